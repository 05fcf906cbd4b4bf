//! Blocking Playlist Handler — spec §4.6.3.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use crate::error::{PackagerError, Result};
use crate::llhls::manager::LLHLSManager;

const DEFAULT_TIMEOUT: f64 = 6.0;

#[derive(Debug, Clone, Copy)]
pub struct PlaylistRequest {
    pub msn: u64,
    pub part: Option<u32>,
    pub skip_request: bool,
}

impl PlaylistRequest {
    /// `latest_msn >= 0 && request.msn <= latest_msn && (request.msn <
    /// latest_msn || request.part <= latest_part when both present)`.
    pub fn is_satisfied(&self, latest_msn: u64, latest_part: Option<u32>) -> bool {
        if self.msn > latest_msn {
            return false;
        }
        if self.msn == latest_msn {
            if let (Some(req_part), Some(latest)) = (self.part, latest_part) {
                return req_part <= latest;
            }
        }
        true
    }
}

struct Waiter {
    request: PlaylistRequest,
    respond: oneshot::Sender<Result<String>>,
}

/// Services blocking-reload requests (`_HLS_msn`/`_HLS_part`/`_HLS_skip`)
/// against an [`LLHLSManager`]. Per spec §9, the handler holds only a weak,
/// lookup-only reference to the manager: it never drives mutation, and a
/// dropped manager simply fails pending/future waits rather than keeping
/// the manager alive. Waiters are plain oneshot channels registered in
/// insertion order; `notify`/`notify_stream_ended` resolve them in that
/// same order, matching the teacher's pattern of a single owning task
/// draining a side channel rather than shared mutable state.
pub struct BlockingPlaylistHandler {
    next_waiter_id: u64,
    waiters: HashMap<u64, Waiter>,
    waiter_order: Vec<u64>,
    timeout_secs: f64,
    manager: Weak<Mutex<LLHLSManager>>,
}

impl Default for BlockingPlaylistHandler {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, Weak::new())
    }
}

impl BlockingPlaylistHandler {
    pub fn new(timeout_secs: f64, manager: Weak<Mutex<LLHLSManager>>) -> Self {
        Self {
            next_waiter_id: 0,
            waiters: HashMap::new(),
            waiter_order: Vec::new(),
            timeout_secs,
            manager,
        }
    }

    /// Render the playlist (full or delta) off the live manager. Fails if
    /// the manager has been dropped out from under this weak reference.
    async fn render(&self, skip_request: bool) -> Result<String> {
        let manager = self.manager.upgrade().ok_or(PackagerError::Cancelled)?;
        let mgr = manager.lock().await;
        Ok(mgr.render_delta_playlist(skip_request))
    }

    /// Wait until `request` is satisfied (or times out), resolving with
    /// rendered playlist text pulled from the manager at satisfaction time.
    pub async fn wait_for(
        &mut self,
        request: PlaylistRequest,
        latest_msn: u64,
        latest_part: Option<u32>,
        stream_ended: bool,
    ) -> Result<String> {
        if stream_ended {
            return Err(PackagerError::StreamAlreadyEnded);
        }
        if request.is_satisfied(latest_msn, latest_part) {
            return self.render(request.skip_request).await;
        }

        let (tx, rx) = oneshot::channel();
        let id = self.register(request, tx);
        match timeout(Duration::from_secs_f64(self.timeout_secs), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.remove_waiter(id);
                Err(PackagerError::Cancelled)
            }
            Err(_) => {
                self.remove_waiter(id);
                Err(PackagerError::RequestTimeout {
                    msn: request.msn,
                    part: request.part,
                    timeout: self.timeout_secs,
                })
            }
        }
    }

    fn register(&mut self, request: PlaylistRequest, respond: oneshot::Sender<Result<String>>) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.insert(id, Waiter { request, respond });
        self.waiter_order.push(id);
        id
    }

    fn remove_waiter(&mut self, id: u64) {
        self.waiters.remove(&id);
        self.waiter_order.retain(|w| *w != id);
    }

    /// Resume every waiter whose predicate now holds, in insertion order,
    /// each with its own freshly rendered playlist text.
    pub async fn notify(&mut self, latest_msn: u64, latest_part: Option<u32>) {
        let mut resumed = Vec::new();
        for id in &self.waiter_order {
            if let Some(waiter) = self.waiters.get(id) {
                if waiter.request.is_satisfied(latest_msn, latest_part) {
                    resumed.push(*id);
                }
            }
        }
        for id in resumed {
            if let Some(waiter) = self.waiters.remove(&id) {
                let result = self.render(waiter.request.skip_request).await;
                let _ = waiter.respond.send(result);
            }
        }
        self.waiter_order.retain(|id| self.waiters.contains_key(id));
    }

    /// Resume every pending waiter with `StreamAlreadyEnded`, in
    /// insertion order.
    pub fn notify_stream_ended(&mut self) {
        for id in std::mem::take(&mut self.waiter_order) {
            if let Some(waiter) = self.waiters.remove(&id) {
                let _ = waiter.respond.send(Err(PackagerError::StreamAlreadyEnded));
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.waiter_order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerControlConfig;

    fn sc() -> ServerControlConfig {
        ServerControlConfig {
            can_block_reload: true,
            hold_back: Some(3.0),
            part_hold_back: Some(1.0),
            can_skip_until: None,
            can_skip_date_ranges: false,
        }
    }

    #[test]
    fn already_satisfied_requests_match_immediately() {
        let req = PlaylistRequest { msn: 3, part: Some(1), skip_request: false };
        assert!(req.is_satisfied(5, None));
        assert!(req.is_satisfied(3, Some(1)));
        assert!(!req.is_satisfied(2, None));
    }

    #[test]
    fn same_msn_requires_part_to_be_less_or_equal() {
        let req = PlaylistRequest { msn: 5, part: Some(3), skip_request: false };
        assert!(req.is_satisfied(5, Some(3)));
        assert!(req.is_satisfied(5, Some(4)));
        assert!(!req.is_satisfied(5, Some(2)));
    }

    #[tokio::test]
    async fn timeout_fires_and_removes_waiter() {
        let mut handler = BlockingPlaylistHandler::new(0.05, Weak::new());
        let req = PlaylistRequest { msn: 10, part: Some(2), skip_request: false };
        let err = handler.wait_for(req, 5, None, false).await.unwrap_err();
        assert!(matches!(
            err,
            PackagerError::RequestTimeout { msn: 10, part: Some(2), .. }
        ));
        assert_eq!(handler.pending_count(), 0);
    }

    #[tokio::test]
    async fn stream_ended_before_wait_fails_immediately() {
        let mut handler = BlockingPlaylistHandler::new(1.0, Weak::new());
        let req = PlaylistRequest { msn: 10, part: None, skip_request: false };
        let err = handler.wait_for(req, 5, None, true).await.unwrap_err();
        assert!(matches!(err, PackagerError::StreamAlreadyEnded));
    }

    #[tokio::test]
    async fn dropped_manager_fails_an_already_satisfied_request() {
        let mut handler = BlockingPlaylistHandler::new(1.0, Weak::new());
        let req = PlaylistRequest { msn: 0, part: None, skip_request: false };
        let err = handler.wait_for(req, 0, None, false).await.unwrap_err();
        assert!(matches!(err, PackagerError::Cancelled));
    }

    #[tokio::test]
    async fn notify_resumes_satisfied_waiter_with_rendered_playlist() {
        let (_shared, mut handler, _events) =
            LLHLSManager::new_shared(2.0, 0.5, 4, 3, sc(), false, 5.0);
        let req = PlaylistRequest { msn: 7, part: None, skip_request: false };
        let (tx, rx) = oneshot::channel();
        let id = handler.register(req, tx);
        handler.notify(7, None).await;
        let rendered = rx.await.unwrap().unwrap();
        assert!(rendered.starts_with("#EXTM3U"));
        assert_eq!(handler.waiters.contains_key(&id), false);
    }
}
