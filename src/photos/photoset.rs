//! Chain reconciliation for photosets.
//!
//! A chain is keyed by its anchor: the one visible member with `isroot = 1`.
//! Every other member points at the anchor through `rootid`. A lone photo has
//! `rootid = 0` and `isroot = 0`. Membership changes run inside a single
//! transaction; regenerating the animation happens afterwards and may fail
//! without undoing them.

use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::database::{execute_query, fetch_all, get_connection, queries, with_transaction, DbPool};
use crate::error::{AppError, AppResult};
use crate::models::{ChainRole, NewPhoto, Photo, StoredImage};
use crate::photos::store::{map_photo_row, PhotoStore};
use crate::processor::images::animation_name;

/// Per-root mutual exclusion for animation recomputes.
///
/// Waiters for the same root queue in arrival order. Entries are dropped
/// from the map once nobody holds or waits for them.
#[derive(Default)]
pub struct RecomputeRegistry {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct RecomputePermit {
    registry: Arc<RecomputeRegistry>,
    root_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RecomputeRegistry {
    pub async fn acquire(self: &Arc<Self>, root_id: i64) -> RecomputePermit {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(root_id).or_default().clone()
        };

        let guard = lock.lock_owned().await;

        RecomputePermit {
            registry: Arc::clone(self),
            root_id,
            guard: Some(guard),
        }
    }

    /// Number of roots with a recompute running or queued.
    pub fn in_flight(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for RecomputePermit {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self
            .registry
            .locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(&self.root_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.root_id);
            }
        }
    }
}

/// What a delete left behind for the post-commit phase.
#[derive(Debug, Default)]
struct DeleteFollowup {
    /// Anchor the stale animations were composed for. Its permit guards
    /// their removal against a compose still running for it.
    stale_root: i64,
    stale_animations: Vec<String>,
    /// Chain that needs a fresh animation.
    recompute_root: Option<i64>,
}

/// Every name an anchor's animation may be stored under. The derived name
/// covers a first compose that has not recorded its result yet.
fn anchor_animations(anchor: &Photo) -> Vec<String> {
    let mut names = vec![animation_name(&anchor.filename)];
    if let Some(stored) = &anchor.animation_filename {
        if !names.contains(stored) {
            names.push(stored.clone());
        }
    }
    names
}

pub struct PhotosetEngine {
    pool: DbPool,
    store: Arc<PhotoStore>,
    registry: Arc<RecomputeRegistry>,
}

impl PhotosetEngine {
    pub fn new(pool: DbPool, store: Arc<PhotoStore>) -> Self {
        Self {
            pool,
            store,
            registry: Arc::new(RecomputeRegistry::default()),
        }
    }

    pub fn registry(&self) -> &Arc<RecomputeRegistry> {
        &self.registry
    }

    /// Visible members of the chain rooted at `root_id`, anchor included,
    /// ordered by capture time then id.
    pub fn members(&self, conn: &Connection, root_id: i64) -> AppResult<Vec<Photo>> {
        fetch_all(
            conn,
            queries::chains::SELECT_MEMBERS,
            &[&root_id, &root_id],
            map_photo_row,
        )
    }

    /// Maps a requested parent photo to the anchor the new photo will point
    /// at. Pointing at a member joins that member's chain.
    fn resolve_root(&self, conn: &Connection, requested: i64) -> AppResult<i64> {
        let parent = self.store.get_visible(conn, requested)?;

        match parent.chain_role() {
            ChainRole::Member { root_id } => {
                self.store.get_visible(conn, root_id)?;
                Ok(root_id)
            }
            ChainRole::Anchor | ChainRole::Singleton => Ok(parent.id),
        }
    }

    /// Stores a new photo and joins it to the requested chain, if any.
    ///
    /// On failure the already written renditions are removed.
    pub async fn add_photo(&self, meta: NewPhoto, image: StoredImage) -> AppResult<Photo> {
        let inserted = self.insert_chained(&meta, &image);

        let (photo, root_id) = match inserted {
            Ok(result) => result,
            Err(e) => {
                if let Err(cleanup) = self.store.images().remove(&image.filename).await {
                    warn!("Failed to clean up upload {}: {}", image.filename, cleanup);
                }
                return Err(e);
            }
        };

        if let Some(root_id) = root_id {
            self.recompute_logged(root_id).await;
        }

        Ok(photo)
    }

    fn insert_chained(&self, meta: &NewPhoto, image: &StoredImage) -> AppResult<(Photo, Option<i64>)> {
        let mut conn = get_connection(&self.pool)?;

        with_transaction(&mut conn, |tx| {
            let root_id = if meta.root_id > 0 {
                Some(self.resolve_root(tx, meta.root_id)?)
            } else {
                None
            };

            let meta = NewPhoto {
                root_id: root_id.unwrap_or(0),
                ..meta.clone()
            };
            let id = self.store.insert(tx, &meta, image)?;

            if let Some(root_id) = root_id {
                execute_query(tx, queries::chains::MARK_ROOT, &[&root_id])?;
                debug!("Photo {} joined chain {}", id, root_id);
            }

            Ok((self.store.get_visible(tx, id)?, root_id))
        })
    }

    /// Soft-deletes a photo and repairs its chain.
    pub async fn delete_photo(&self, photo_id: i64) -> AppResult<Photo> {
        let (deleted, followup) = {
            let mut conn = get_connection(&self.pool)?;
            with_transaction(&mut conn, |tx| self.unlink(tx, photo_id))?
        };

        self.store.remove_files(&deleted).await;

        if !followup.stale_animations.is_empty() {
            let _permit = self.registry.acquire(followup.stale_root).await;

            for name in &followup.stale_animations {
                if let Err(e) = self.store.images().remove_animation(name).await {
                    warn!("Failed to remove animation {}: {}", name, e);
                }
            }
        }

        if let Some(root_id) = followup.recompute_root {
            self.recompute_logged(root_id).await;
        }

        info!("Deleted photo {}", deleted.id);
        Ok(deleted)
    }

    fn unlink(&self, tx: &Connection, photo_id: i64) -> AppResult<(Photo, DeleteFollowup)> {
        let photo = self.store.get_visible(tx, photo_id)?;
        self.store.soft_delete(tx, photo.id)?;

        let followup = match photo.chain_role() {
            ChainRole::Singleton => DeleteFollowup::default(),
            ChainRole::Anchor => self.promote_successor(tx, &photo)?,
            ChainRole::Member { root_id } => self.shrink_chain(tx, root_id)?,
        };

        Ok((photo, followup))
    }

    /// The earliest remaining member becomes the anchor; the others are
    /// repointed at it and the set's votes move with it.
    fn promote_successor(&self, tx: &Connection, anchor: &Photo) -> AppResult<DeleteFollowup> {
        let followers = fetch_all(
            tx,
            queries::chains::SELECT_FOLLOWERS,
            &[&anchor.id],
            map_photo_row,
        )?;

        let Some((successor, rest)) = followers.split_first() else {
            return Ok(DeleteFollowup {
                stale_root: anchor.id,
                stale_animations: anchor_animations(anchor),
                recompute_root: None,
            });
        };

        let still_chained = !rest.is_empty();
        execute_query(
            tx,
            queries::chains::PROMOTE_ANCHOR,
            &[&(still_chained as i64), &successor.id],
        )?;
        execute_query(
            tx,
            queries::chains::REPOINT_FOLLOWERS,
            &[&successor.id, &anchor.id, &successor.id],
        )?;
        execute_query(
            tx,
            queries::likes::MOVE_TO_ROOT,
            &[&successor.id, &anchor.id],
        )?;
        execute_query(tx, queries::likes::DELETE_FOR_ROOT, &[&anchor.id])?;

        debug!(
            "Photo {} replaces {} as anchor of {} photos",
            successor.id,
            anchor.id,
            followers.len()
        );

        // The old animation is named after the old anchor
        Ok(DeleteFollowup {
            stale_root: anchor.id,
            stale_animations: anchor_animations(anchor),
            recompute_root: still_chained.then_some(successor.id),
        })
    }

    fn shrink_chain(&self, tx: &Connection, root_id: i64) -> AppResult<DeleteFollowup> {
        let remaining = self.members(tx, root_id)?;

        if remaining.len() >= 2 {
            return Ok(DeleteFollowup {
                stale_root: root_id,
                stale_animations: Vec::new(),
                recompute_root: Some(root_id),
            });
        }

        let stale_animations = self
            .store
            .get(tx, root_id)?
            .map(|anchor| anchor_animations(&anchor))
            .unwrap_or_default();
        for member in &remaining {
            execute_query(tx, queries::chains::COLLAPSE, &[&member.id])?;
        }

        debug!("Chain {} collapsed to a single photo", root_id);
        Ok(DeleteFollowup {
            stale_root: root_id,
            stale_animations,
            recompute_root: None,
        })
    }

    /// Regenerates the animation of the chain at `root_id` from its current
    /// members. Returns the stored animation name, or `None` when the chain
    /// has fewer than two visible members.
    ///
    /// Runs at most once at a time per root; later callers wait their turn.
    pub async fn recompute(&self, root_id: i64) -> AppResult<Option<String>> {
        let _permit = self.registry.acquire(root_id).await;

        let members = {
            let conn = get_connection(&self.pool)?;
            self.members(&conn, root_id)?
        };

        if members.len() < 2 {
            debug!("Chain {} has {} members, no animation", root_id, members.len());
            return Ok(None);
        }

        let Some(anchor) = members.iter().find(|m| m.id == root_id && m.is_root) else {
            return Err(AppError::Internal(format!(
                "Chain {} has members but no visible anchor",
                root_id
            )));
        };

        let frames: Vec<String> = members.iter().map(|m| m.filename.clone()).collect();
        let name = self
            .store
            .images()
            .compose_animation(&frames, &anchor.filename)
            .await?;

        let conn = get_connection(&self.pool)?;
        execute_query(&conn, queries::chains::SET_ANIMATION, &[&name, &root_id])?;

        info!("Animation {} composed from {} photos", name, frames.len());
        Ok(Some(name))
    }

    /// Recompute whose failure is logged and swallowed; chain metadata stays
    /// authoritative and the animation can be rebuilt later.
    pub async fn recompute_logged(&self, root_id: i64) {
        if let Err(e) = self.recompute(root_id).await {
            warn!("Animation recompute for chain {} failed: {}", root_id, e);
        }
    }

    /// Anchors whose animation is missing although they have followers.
    pub fn roots_missing_animation(&self) -> AppResult<Vec<i64>> {
        let conn = get_connection(&self.pool)?;
        fetch_all(
            &conn,
            queries::chains::SELECT_MISSING_ANIMATIONS,
            &[],
            |row| row.get(0),
        )
    }

    /// The photoset containing `id`, resolved to its anchor.
    pub fn get_photoset(&self, conn: &Connection, id: i64) -> AppResult<(i64, Vec<Photo>)> {
        let photo = self.store.get_visible(conn, id)?;
        let root_id = photo.set_root();

        let members = self.members(conn, root_id)?;
        if members.is_empty() {
            return Err(AppError::PhotoNotFound(id));
        }

        Ok((root_id, members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageConfig;
    use crate::models::{AuthLevel, LikeSummary};
    use crate::photos::likes::LikeLedger;
    use crate::test_utils::{assert_chain_invariants, create_test_db, stored_image, FakeImageService};
    use std::time::Duration;

    struct Fixture {
        pool: DbPool,
        images: Arc<FakeImageService>,
        engine: Arc<PhotosetEngine>,
    }

    fn fixture() -> Fixture {
        let pool = create_test_db();
        let images = Arc::new(FakeImageService::default());
        let store = Arc::new(PhotoStore::new(
            pool.clone(),
            images.clone(),
            &ImageConfig::default(),
        ));
        let engine = Arc::new(PhotosetEngine::new(pool.clone(), store));
        Fixture {
            pool,
            images,
            engine,
        }
    }

    impl Fixture {
        async fn upload(&self, root_id: i64, minute: u32) -> Photo {
            let meta = NewPhoto {
                device_id: 1,
                root_id,
                ..NewPhoto::default()
            };
            self.engine
                .add_photo(meta, stored_image(minute))
                .await
                .unwrap()
        }

        fn photo(&self, id: i64) -> Photo {
            let conn = self.pool.get().unwrap();
            self.engine.store.get(&conn, id).unwrap().unwrap()
        }

        fn check(&self) {
            let conn = self.pool.get().unwrap();
            assert_chain_invariants(&conn);
        }
    }

    #[tokio::test]
    async fn test_upload_and_delete_scenario() {
        let f = fixture();

        let a = f.upload(0, 0).await;
        assert_eq!(a.chain_role(), ChainRole::Singleton);
        f.check();

        let b = f.upload(a.id, 1).await;
        let anchor = f.photo(a.id);
        assert!(anchor.is_root);
        assert_eq!(f.photo(b.id).root_id, a.id);
        assert_eq!(
            f.images.last_compose(),
            Some((vec![a.filename.clone(), b.filename.clone()], a.filename.clone()))
        );
        assert!(anchor.animation_filename.is_some());
        f.check();

        let c = f.upload(a.id, 2).await;
        assert_eq!(
            f.images.last_compose().unwrap().0,
            vec![a.filename.clone(), b.filename.clone(), c.filename.clone()]
        );
        f.check();

        f.engine.delete_photo(a.id).await.unwrap();
        let new_anchor = f.photo(b.id);
        assert!(new_anchor.is_root);
        assert_eq!(new_anchor.root_id, 0);
        assert_eq!(f.photo(c.id).root_id, b.id);
        assert_eq!(
            f.images.last_compose(),
            Some((vec![b.filename.clone(), c.filename.clone()], b.filename.clone()))
        );
        assert!(new_anchor.animation_filename.is_some());
        assert!(f
            .images
            .removed_animations()
            .contains(&format!("{}.gif", a.filename)));
        f.check();

        f.engine.delete_photo(c.id).await.unwrap();
        let single = f.photo(b.id);
        assert_eq!(single.chain_role(), ChainRole::Singleton);
        assert!(single.animation_filename.is_none());
        assert!(f
            .images
            .removed_animations()
            .contains(&format!("{}.gif", b.filename)));
        assert!(f.images.removed().contains(&c.filename));
        f.check();
    }

    #[tokio::test]
    async fn test_anchor_delete_promotes_chronologically_first() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        // Uploaded out of capture order
        let late = f.upload(a.id, 30).await;
        let early = f.upload(a.id, 10).await;
        let middle = f.upload(a.id, 20).await;

        f.engine.delete_photo(a.id).await.unwrap();

        assert!(f.photo(early.id).is_root);
        assert_eq!(f.photo(middle.id).root_id, early.id);
        assert_eq!(f.photo(late.id).root_id, early.id);
        assert_eq!(
            f.images.last_compose().unwrap().0,
            vec![early.filename.clone(), middle.filename.clone(), late.filename.clone()]
        );
        f.check();
    }

    #[tokio::test]
    async fn test_capture_time_ties_break_by_id() {
        let f = fixture();
        let a = f.upload(0, 5).await;
        let b = f.upload(a.id, 5).await;
        let c = f.upload(a.id, 5).await;

        f.engine.delete_photo(a.id).await.unwrap();

        assert!(f.photo(b.id).is_root);
        assert_eq!(f.photo(c.id).root_id, b.id);
    }

    #[tokio::test]
    async fn test_anchor_of_pair_deleted_leaves_singleton() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        let b = f.upload(a.id, 1).await;
        let composes = f.images.compose_calls().len();

        f.engine.delete_photo(a.id).await.unwrap();

        let left = f.photo(b.id);
        assert_eq!(left.chain_role(), ChainRole::Singleton);
        assert!(left.animation_filename.is_none());
        assert_eq!(f.images.compose_calls().len(), composes);
        f.check();
    }

    #[tokio::test]
    async fn test_member_delete_recomputes_remaining_chain() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        let b = f.upload(a.id, 1).await;
        let c = f.upload(a.id, 2).await;

        f.engine.delete_photo(b.id).await.unwrap();

        assert!(f.photo(a.id).is_root);
        assert_eq!(f.photo(c.id).root_id, a.id);
        assert_eq!(
            f.images.last_compose().unwrap().0,
            vec![a.filename.clone(), c.filename.clone()]
        );
        assert!(!f.photo(b.id).visible);
        f.check();
    }

    #[tokio::test]
    async fn test_singleton_delete_has_no_chain_work() {
        let f = fixture();
        let a = f.upload(0, 0).await;

        let deleted = f.engine.delete_photo(a.id).await.unwrap();

        assert_eq!(deleted.id, a.id);
        assert!(!f.photo(a.id).visible);
        assert!(f.images.compose_calls().is_empty());
        assert!(f.images.removed_animations().is_empty());

        let again = f.engine.delete_photo(a.id).await;
        assert!(matches!(again, Err(AppError::PhotoNotFound(_))));
    }

    #[tokio::test]
    async fn test_upload_to_member_joins_its_anchor() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        let b = f.upload(a.id, 1).await;

        let c = f.upload(b.id, 2).await;

        assert_eq!(c.root_id, a.id);
        assert!(!f.photo(b.id).is_root);
        f.check();
    }

    #[tokio::test]
    async fn test_upload_to_missing_or_hidden_root_fails_and_cleans_up() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        f.engine.delete_photo(a.id).await.unwrap();

        let meta = NewPhoto {
            device_id: 1,
            root_id: a.id,
            ..NewPhoto::default()
        };
        let image = stored_image(1);
        let result = f.engine.add_photo(meta, image.clone()).await;

        assert!(matches!(result, Err(AppError::PhotoNotFound(id)) if id == a.id));
        assert!(f.images.removed().contains(&image.filename));

        let conn = f.pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM photo", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_compose_failure_keeps_membership_and_previous_animation() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        f.upload(a.id, 1).await;
        let before = f.photo(a.id).animation_filename;
        assert!(before.is_some());

        f.images.set_fail_compose(true);
        let c = f.upload(a.id, 2).await;

        assert_eq!(f.photo(c.id).root_id, a.id);
        assert_eq!(f.photo(a.id).animation_filename, before);
        f.check();

        f.images.set_fail_compose(false);
        let name = f.engine.recompute(a.id).await.unwrap();
        assert_eq!(name, before);
        assert_eq!(f.images.last_compose().unwrap().0.len(), 3);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        f.upload(a.id, 1).await;
        f.upload(a.id, 2).await;

        let first = f.engine.recompute(a.id).await.unwrap();
        let second = f.engine.recompute(a.id).await.unwrap();

        assert_eq!(first, second);
        let calls = f.images.compose_calls();
        let n = calls.len();
        assert_eq!(calls[n - 1], calls[n - 2]);
        assert_eq!(f.photo(a.id).animation_filename, first);
        f.check();
    }

    #[tokio::test]
    async fn test_recompute_below_two_members_is_noop() {
        let f = fixture();
        let a = f.upload(0, 0).await;

        assert_eq!(f.engine.recompute(a.id).await.unwrap(), None);
        assert_eq!(f.engine.recompute(9_999).await.unwrap(), None);
        assert!(f.images.compose_calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recomputes_for_one_root_do_not_overlap() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        f.upload(a.id, 1).await;
        f.images.set_compose_delay(Duration::from_millis(30));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = f.engine.clone();
                tokio::spawn(async move { engine.recompute(a.id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.images.max_concurrent_compose(), 1);
        assert_eq!(f.engine.registry().in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_recomputes_for_different_roots_run_in_parallel() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        f.upload(a.id, 1).await;
        let b = f.upload(0, 2).await;
        f.upload(b.id, 3).await;
        f.images.set_compose_delay(Duration::from_millis(100));

        let (ra, rb) = tokio::join!(f.engine.recompute(a.id), f.engine.recompute(b.id));
        ra.unwrap();
        rb.unwrap();

        assert_eq!(f.images.max_concurrent_compose(), 2);
    }

    #[tokio::test]
    async fn test_registry_cleans_up_entries() {
        let registry = Arc::new(RecomputeRegistry::default());

        let first = registry.acquire(7).await;
        assert_eq!(registry.in_flight(), 1);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _permit = registry.acquire(7).await;
            })
        };
        tokio::task::yield_now().await;
        drop(first);
        waiter.await.unwrap();

        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_get_photoset_from_any_member() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        let b = f.upload(a.id, 1).await;
        let lone = f.upload(0, 2).await;

        let conn = f.pool.get().unwrap();
        let (root, members) = f.engine.get_photoset(&conn, b.id).unwrap();
        assert_eq!(root, a.id);
        assert_eq!(
            members.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );

        let (root, members) = f.engine.get_photoset(&conn, lone.id).unwrap();
        assert_eq!(root, lone.id);
        assert_eq!(members.len(), 1);

        assert!(matches!(
            f.engine.get_photoset(&conn, 9_999),
            Err(AppError::PhotoNotFound(9_999))
        ));
    }

    #[tokio::test]
    async fn test_roots_missing_animation() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        f.images.set_fail_compose(true);
        f.upload(a.id, 1).await;

        assert_eq!(f.engine.roots_missing_animation().unwrap(), vec![a.id]);

        f.images.set_fail_compose(false);
        f.engine.recompute(a.id).await.unwrap();
        assert!(f.engine.roots_missing_animation().unwrap().is_empty());
    }
    fn position(events: &[String], event: &str) -> usize {
        events
            .iter()
            .rposition(|e| e == event)
            .unwrap_or_else(|| panic!("no event {:?} in {:?}", event, events))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_anchor_delete_waits_for_running_compose_before_removing() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        let b = f.upload(a.id, 1).await;
        f.upload(a.id, 2).await;
        f.images.set_compose_delay(Duration::from_millis(200));

        let running = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.recompute(a.id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.engine.delete_photo(a.id).await.unwrap();
        running.await.unwrap().unwrap();

        let stale = format!("{}.gif", a.filename);
        let events = f.images.animation_events();
        assert!(
            position(&events, &format!("removed {}", stale))
                > position(&events, &format!("composed {}", stale))
        );
        assert!(f.photo(b.id).is_root);
        assert_eq!(
            f.photo(b.id).animation_filename,
            Some(format!("{}.gif", b.filename))
        );
        f.check();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_collapse_during_first_compose_removes_its_animation() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        f.images.set_compose_delay(Duration::from_millis(200));

        let joining = {
            let engine = f.engine.clone();
            let meta = NewPhoto {
                device_id: 1,
                root_id: a.id,
                ..NewPhoto::default()
            };
            tokio::spawn(async move { engine.add_photo(meta, stored_image(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.photo(a.id).is_root);
        assert!(f.photo(a.id).animation_filename.is_none());

        let b_id = {
            let conn = f.pool.get().unwrap();
            conn.query_row("SELECT id FROM photo WHERE rootid = ?", [a.id], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap()
        };
        f.engine.delete_photo(b_id).await.unwrap();
        let joined = joining.await.unwrap().unwrap();
        assert_eq!(joined.id, b_id);

        let name = format!("{}.gif", a.filename);
        let events = f.images.animation_events();
        assert!(
            position(&events, &format!("removed {}", name))
                > position(&events, &format!("composed {}", name))
        );

        let left = f.photo(a.id);
        assert_eq!(left.chain_role(), ChainRole::Singleton);
        assert!(left.animation_filename.is_none());
        f.check();
    }

    #[tokio::test]
    async fn test_votes_follow_promoted_anchor() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        let b = f.upload(a.id, 1).await;
        let c = f.upload(a.id, 2).await;
        let ledger = LikeLedger::new();
        {
            let mut conn = f.pool.get().unwrap();
            ledger.toggle(&mut conn, AuthLevel::User(1), c.id, 1).unwrap();
            ledger.toggle(&mut conn, AuthLevel::User(2), a.id, -1).unwrap();
        }

        f.engine.delete_photo(a.id).await.unwrap();

        let conn = f.pool.get().unwrap();
        assert_eq!(
            ledger.summary(&conn, b.id, Some(1)).unwrap(),
            LikeSummary {
                your_likes: 1,
                likes: 1,
                dislikes: 1,
            }
        );
        assert_eq!(
            ledger.summary(&conn, a.id, Some(1)).unwrap(),
            LikeSummary::default()
        );
    }

    #[tokio::test]
    async fn test_votes_follow_survivor_of_pair() {
        let f = fixture();
        let a = f.upload(0, 0).await;
        let b = f.upload(a.id, 1).await;
        let ledger = LikeLedger::new();
        {
            let mut conn = f.pool.get().unwrap();
            ledger.toggle(&mut conn, AuthLevel::User(3), b.id, 1).unwrap();
        }

        f.engine.delete_photo(a.id).await.unwrap();

        let mut conn = f.pool.get().unwrap();
        assert_eq!(ledger.summary(&conn, b.id, Some(3)).unwrap().your_likes, 1);

        // Casting the same vote again on the survivor clears it
        let cleared = ledger.toggle(&mut conn, AuthLevel::User(3), b.id, 1).unwrap();
        assert_eq!(cleared, LikeSummary::default());
    }
}
