//! In-memory media control plane
//!
//! Holds ingresses and rooms in process memory. Used by tests and local
//! development; exposes hooks to inject remote status changes, out-of-band
//! deletions, failures and latency.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{
    ControlPlaneError, CreateIngressRequest, CreateRoomRequest, IngressFilter, IngressInfo,
    IngressStatus, MediaControlPlane, Result, RoomInfo,
};

#[derive(Default)]
struct State {
    ingresses: HashMap<String, IngressInfo>,
    rooms: HashMap<String, RoomInfo>,
    create_failures: VecDeque<ControlPlaneError>,
    create_requests: Vec<CreateIngressRequest>,
}

pub struct InMemoryControlPlane {
    state: Mutex<State>,
    next_id: AtomicU64,
    initial_status: Mutex<IngressStatus>,
    create_delay: Mutex<Option<Duration>>,
    create_calls: AtomicUsize,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryControlPlane {
    /// New ingresses report `Publishing` right away
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial_status(IngressStatus::Publishing)
    }

    #[must_use]
    pub fn with_initial_status(status: IngressStatus) -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(1),
            initial_status: Mutex::new(status),
            create_delay: Mutex::new(None),
            create_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_initial_status(&self, status: IngressStatus) {
        *self.initial_status.lock() = status;
    }

    /// Delay every `create_ingress` call, widening race windows in tests
    pub fn set_create_delay(&self, delay: Option<Duration>) {
        *self.create_delay.lock() = delay;
    }

    /// Make the next `create_ingress` call fail with `error`
    pub fn fail_next_create(&self, error: ControlPlaneError) {
        self.state.lock().create_failures.push_back(error);
    }

    /// Change the status the server reports for an ingress
    pub fn set_status(&self, ingress_id: &str, status: IngressStatus) -> bool {
        let mut state = self.state.lock();
        match state.ingresses.get_mut(ingress_id) {
            Some(ingress) => {
                ingress.status = status;
                true
            }
            None => false,
        }
    }

    /// Delete an ingress behind the caller's back
    pub fn remove(&self, ingress_id: &str) -> Option<IngressInfo> {
        self.state.lock().ingresses.remove(ingress_id)
    }

    #[must_use]
    pub fn ingress(&self, ingress_id: &str) -> Option<IngressInfo> {
        self.state.lock().ingresses.get(ingress_id).cloned()
    }

    #[must_use]
    pub fn ingress_count(&self) -> usize {
        self.state.lock().ingresses.len()
    }

    #[must_use]
    pub fn has_room(&self, room_name: &str) -> bool {
        self.state.lock().rooms.contains_key(room_name)
    }

    /// Requests received by `create_ingress`, in order
    #[must_use]
    pub fn create_requests(&self) -> Vec<CreateIngressRequest> {
        self.state.lock().create_requests.clone()
    }

    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaControlPlane for InMemoryControlPlane {
    async fn create_ingress(&self, request: CreateIngressRequest) -> Result<IngressInfo> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.create_requests.push(request.clone());
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }

        let ingress_id = format!("IN_{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let ingress = IngressInfo {
            url: Some(format!("rtmp://ingress.local/live/{ingress_id}")),
            ingress_id: ingress_id.clone(),
            room_name: request.room_name,
            status: *self.initial_status.lock(),
            error: None,
        };
        state.ingresses.insert(ingress_id, ingress.clone());
        Ok(ingress)
    }

    async fn list_ingress(&self, filter: IngressFilter) -> Result<Vec<IngressInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.state.lock();
        let mut ingresses: Vec<IngressInfo> = state
            .ingresses
            .values()
            .filter(|ingress| filter.matches(ingress))
            .cloned()
            .collect();
        ingresses.sort_by(|a, b| a.ingress_id.cmp(&b.ingress_id));
        Ok(ingresses)
    }

    async fn delete_ingress(&self, ingress_id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        match self.state.lock().ingresses.remove(ingress_id) {
            Some(_) => Ok(()),
            None => Err(ControlPlaneError::NotFound(format!("ingress {ingress_id}"))),
        }
    }

    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomInfo> {
        let room = RoomInfo {
            name: request.name.clone(),
            num_participants: 0,
            max_participants: request.max_participants,
            created_at: Utc::now(),
        };
        self.state.lock().rooms.entry(request.name).or_insert(room.clone());
        Ok(room)
    }

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>> {
        let mut rooms: Vec<RoomInfo> = self.state.lock().rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    async fn delete_room(&self, room_name: &str) -> Result<()> {
        match self.state.lock().rooms.remove(room_name) {
            Some(_) => Ok(()),
            None => Err(ControlPlaneError::NotFound(format!("room {room_name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(room: &str) -> CreateIngressRequest {
        CreateIngressRequest {
            name: "Broadcast: test".to_string(),
            room_name: room.to_string(),
            source_url: "https://cdn.local/a.mp4".to_string(),
            participant_identity: "video-stream-a".to_string(),
            participant_name: "Video Stream".to_string(),
            enable_transcoding: true,
        }
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let cp = InMemoryControlPlane::with_initial_status(IngressStatus::Buffering);
        let created = cp.create_ingress(request("video-a")).await.unwrap();
        assert_eq!(created.status, IngressStatus::Buffering);
        assert_eq!(cp.create_calls(), 1);

        let listed = cp.list_ingress(IngressFilter::by_id(&created.ingress_id)).await.unwrap();
        assert_eq!(listed, vec![created.clone()]);

        cp.delete_ingress(&created.ingress_id).await.unwrap();
        let err = cp.delete_ingress(&created.ingress_id).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::NotFound(_)));
        assert_eq!(cp.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let cp = InMemoryControlPlane::new();
        cp.fail_next_create(ControlPlaneError::Transport("connection reset".to_string()));

        assert!(cp.create_ingress(request("video-a")).await.is_err());
        assert!(cp.create_ingress(request("video-a")).await.is_ok());
        assert_eq!(cp.ingress_count(), 1);
    }

    #[tokio::test]
    async fn test_status_injection_and_out_of_band_removal() {
        let cp = InMemoryControlPlane::new();
        let created = cp.create_ingress(request("video-a")).await.unwrap();

        assert!(cp.set_status(&created.ingress_id, IngressStatus::Complete));
        assert_eq!(cp.ingress(&created.ingress_id).unwrap().status, IngressStatus::Complete);

        assert!(cp.remove(&created.ingress_id).is_some());
        assert!(!cp.set_status(&created.ingress_id, IngressStatus::Error));
        assert!(cp.list_ingress(IngressFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rooms() {
        let cp = InMemoryControlPlane::new();
        cp.create_room(CreateRoomRequest {
            name: "video-a".to_string(),
            empty_timeout_secs: 300,
            max_participants: 100,
            metadata: None,
        })
        .await
        .unwrap();

        assert!(cp.has_room("video-a"));
        assert_eq!(cp.list_rooms().await.unwrap().len(), 1);
        cp.delete_room("video-a").await.unwrap();
        assert!(cp.delete_room("video-a").await.is_err());
    }
}
