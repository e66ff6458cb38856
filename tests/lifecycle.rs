use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::{BoxFuture, join_all, pending};
use party_matching_back::{
    config::AppConfig,
    dao::{
        models::MAX_TEAM_MEMBERS,
        record_store::{MemoryRecordStore, RecordStore},
        storage::StorageResult,
        teamspace::TeamspaceRepository,
    },
    error::{AppError, ErrorCode, ServiceError},
    services::{identity::AuthMode, party_service::PartyLifecycle},
    state::{AppState, SharedState},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::time::sleep;
use uuid::Uuid;

const TEAMSPACE_PREFIX: &str = "teamspace:";

/// Memory store that answers every call after a random delay, so concurrent operations
/// interleave between their reads and writes the way they do against a remote backend.
#[derive(Clone, Default)]
struct LaggyRecordStore {
    inner: MemoryRecordStore,
    max_latency: Duration,
    /// Extra delay before a teamspace record is created.
    insert_delay: Duration,
    /// While set, conditional updates of teamspace records never complete.
    stall_updates: Arc<AtomicBool>,
}

impl LaggyRecordStore {
    fn with_latency(max_latency: Duration) -> Self {
        Self {
            max_latency,
            ..Self::default()
        }
    }

    fn with_slow_inserts(insert_delay: Duration) -> Self {
        Self {
            insert_delay,
            ..Self::default()
        }
    }

    fn lag(&self) -> Duration {
        let max = self.max_latency.as_micros() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::rng().random_range(0..=max))
    }
}

fn after<T, F>(lag: Duration, op: F) -> BoxFuture<'static, StorageResult<T>>
where
    T: Send + 'static,
    F: FnOnce() -> BoxFuture<'static, StorageResult<T>> + Send + 'static,
{
    Box::pin(async move {
        sleep(lag).await;
        op().await
    })
}

impl RecordStore for LaggyRecordStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<String>>> {
        let (inner, key) = (self.inner.clone(), key.to_owned());
        after(self.lag(), move || inner.get(&key))
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        let (inner, key) = (self.inner.clone(), key.to_owned());
        after(self.lag(), move || inner.set(&key, value, ttl))
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let mut lag = self.lag();
        if key.starts_with(TEAMSPACE_PREFIX) {
            lag += self.insert_delay;
        }
        let (inner, key) = (self.inner.clone(), key.to_owned());
        after(lag, move || inner.set_if_absent(&key, value, ttl))
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        if key.starts_with(TEAMSPACE_PREFIX) && self.stall_updates.load(Ordering::SeqCst) {
            return Box::pin(pending());
        }
        let (inner, key) = (self.inner.clone(), key.to_owned());
        after(self.lag(), move || {
            inner.compare_and_set(&key, expected, value, ttl)
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let (inner, key) = (self.inner.clone(), key.to_owned());
        after(self.lag(), move || inner.delete(&key))
    }

    fn delete_if_equals(
        &self,
        key: &str,
        expected: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let (inner, key) = (self.inner.clone(), key.to_owned());
        after(self.lag(), move || inner.delete_if_equals(&key, expected))
    }

    fn scan_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let (inner, prefix) = (self.inner.clone(), prefix.to_owned());
        after(self.lag(), move || inner.scan_keys(&prefix))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

struct World {
    state: SharedState,
    lifecycle: PartyLifecycle,
    teamspaces: TeamspaceRepository,
}

async fn world() -> World {
    world_on(Arc::new(MemoryRecordStore::new()), AppConfig::default()).await
}

async fn laggy_world() -> World {
    let store = LaggyRecordStore::with_latency(Duration::from_millis(2));
    world_on(Arc::new(store), AppConfig::default()).await
}

async fn world_on(store: Arc<dyn RecordStore>, config: AppConfig) -> World {
    let teamspaces = TeamspaceRepository::new(store.clone(), config.teamspace_ttl);
    let state = AppState::new(config, AuthMode::Bypass);
    state.set_record_store(store).await;
    let lifecycle = state.lifecycle().await.unwrap();
    World {
        state,
        lifecycle,
        teamspaces,
    }
}

async fn assert_invariants(teamspaces: &TeamspaceRepository) {
    let mut seen: HashMap<String, Uuid> = HashMap::new();
    for teamspace in teamspaces.list_all().await.unwrap() {
        assert!(teamspace.members.len() <= MAX_TEAM_MEMBERS);
        assert!(teamspace.is_member(&teamspace.organizer));
        for member in &teamspace.members {
            if let Some(other) = seen.insert(member.clone(), teamspace.teamspace_id) {
                panic!(
                    "{member} is in both {other} and {}",
                    teamspace.teamspace_id
                );
            }
        }
    }
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let w = world().await;
    let id = w.lifecycle.create("alice").await.unwrap();

    let teamspace = w.teamspaces.get(id).await.unwrap().unwrap();
    assert_eq!(teamspace.organizer, "alice");
    assert_eq!(teamspace.member_ids(), vec!["alice".to_string()]);
    assert_eq!(teamspace.party_id, None);
}

#[tokio::test]
async fn fifth_member_is_rejected() {
    let w = world().await;
    let team = w.lifecycle.create("a").await.unwrap();
    for user in ["b", "c", "d"] {
        w.lifecycle.join(user, team).await.unwrap();
    }

    assert!(matches!(
        w.lifecycle.join("e", team).await,
        Err(ServiceError::TeamspaceFull)
    ));
    assert_eq!(w.lifecycle.list_members(team).await.unwrap().len(), 4);
}

#[tokio::test]
async fn live_party_scenario() {
    let w = world().await;
    let team = w.lifecycle.create("a").await.unwrap();
    let party_id = w.lifecycle.promote("a", team).await.unwrap().value;

    w.lifecycle.join_live_party("b", team).await.unwrap();
    assert!(matches!(
        w.lifecycle.promote("b", team).await,
        Err(ServiceError::NotAuthor)
    ));

    let state = w.state.user_states().await.unwrap().state_of("b").await.unwrap();
    assert!(state.in_party);
    assert_eq!(state.party_id, party_id.to_string());
}

#[tokio::test]
async fn organizer_leave_resets_state() {
    let w = world().await;
    let team = w.lifecycle.create("a").await.unwrap();

    w.lifecycle.leave("a", team).await.unwrap();

    assert!(w.teamspaces.get(team).await.unwrap().is_none());
    let state = w.state.user_states().await.unwrap().state_of("a").await.unwrap();
    assert!(!state.organizing && !state.joining_another && !state.in_party);
    assert_eq!(state.teamspace_id, "");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_by_one_user_admit_exactly_one() {
    let w = laggy_world().await;
    let mut teams = Vec::new();
    for organizer in ["o1", "o2", "o3", "o4"] {
        teams.push(w.lifecycle.create(organizer).await.unwrap());
    }

    let attempts = (0..16).map(|i| {
        let lifecycle = w.lifecycle.clone();
        let team = teams[i % teams.len()];
        tokio::spawn(async move { lifecycle.join("joiner", team).await })
    });
    let results = join_all(attempts).await;

    let mut successes = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => successes += 1,
            Err(ServiceError::UserAlreadyInTeam | ServiceError::AlreadyJoined) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_invariants(&w.teamspaces).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_by_one_user_admit_exactly_one() {
    let w = laggy_world().await;

    let attempts = (0..8).map(|_| {
        let lifecycle = w.lifecycle.clone();
        tokio::spawn(async move { lifecycle.create("alice").await })
    });
    let results = join_all(attempts).await;

    let created = results
        .into_iter()
        .filter(|result| matches!(result, Ok(Ok(_))))
        .count();
    assert_eq!(created, 1);
    assert_eq!(w.teamspaces.list_all().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_by_many_users_never_overfill() {
    let w = laggy_world().await;
    let team = w.lifecycle.create("organizer").await.unwrap();

    let attempts = (0..10).map(|i| {
        let lifecycle = w.lifecycle.clone();
        tokio::spawn(async move { lifecycle.join(&format!("user-{i}"), team).await })
    });
    let results = join_all(attempts).await;

    let mut joined = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => joined += 1,
            Err(ServiceError::TeamspaceFull) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(joined, MAX_TEAM_MEMBERS - 1);
    assert_eq!(
        w.lifecycle.list_members(team).await.unwrap().len(),
        MAX_TEAM_MEMBERS
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_concurrent_workload_keeps_invariants() {
    let w = laggy_world().await;
    let users: Vec<String> = (0..8).map(|i| format!("player-{i}")).collect();

    let workers = (0..users.len()).map(|worker| {
        let lifecycle = w.lifecycle.clone();
        let teamspaces = w.teamspaces.clone();
        let users = users.clone();
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(worker as u64);
            for _ in 0..25 {
                let user = &users[rng.random_range(0..users.len())];
                let known: Vec<Uuid> = teamspaces
                    .list_all()
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|teamspace| teamspace.teamspace_id)
                    .collect();
                let target = if known.is_empty() {
                    Uuid::new_v4()
                } else {
                    known[rng.random_range(0..known.len())]
                };

                let outcome = match rng.random_range(0..5) {
                    0 => lifecycle.create(user).await.map(|_| ()),
                    1 => lifecycle.join(user, target).await.map(|_| ()),
                    2 => lifecycle.leave(user, target).await.map(|_| ()),
                    3 => lifecycle.promote(user, target).await.map(|_| ()),
                    _ => lifecycle.join_live_party(user, target).await.map(|_| ()),
                };
                if let Err(
                    err @ (ServiceError::Internal(_)
                    | ServiceError::Unavailable(_)
                    | ServiceError::Timeout),
                ) = outcome
                {
                    panic!("infrastructure failure under contention: {err}");
                }
            }
        })
    });
    for worker in join_all(workers).await {
        worker.unwrap();
    }

    assert_invariants(&w.teamspaces).await;
}

#[tokio::test]
async fn second_create_waits_out_a_slow_insert() {
    let store = LaggyRecordStore::with_slow_inserts(Duration::from_millis(50));
    let w = world_on(Arc::new(store), AppConfig::default()).await;

    let first = {
        let lifecycle = w.lifecycle.clone();
        tokio::spawn(async move { lifecycle.create("alice").await })
    };
    sleep(Duration::from_millis(10)).await;
    let second = w.lifecycle.create("alice").await;

    assert!(first.await.unwrap().is_ok());
    assert!(matches!(second, Err(ServiceError::UserAlreadyInTeam)));
    assert_eq!(w.teamspaces.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn join_during_a_slow_create_is_refused() {
    let store = LaggyRecordStore::with_slow_inserts(Duration::from_millis(50));
    let w = world_on(Arc::new(store), AppConfig::default()).await;
    let zoe_team = w.lifecycle.create("zoe").await.unwrap();

    let create = {
        let lifecycle = w.lifecycle.clone();
        tokio::spawn(async move { lifecycle.create("alice").await })
    };
    sleep(Duration::from_millis(10)).await;
    let join = w.lifecycle.join("alice", zoe_team).await;

    assert!(create.await.unwrap().is_ok());
    assert!(matches!(join, Err(ServiceError::UserAlreadyInTeam)));
    assert_eq!(
        w.lifecycle.list_members(zoe_team).await.unwrap(),
        vec!["zoe".to_string()]
    );
    assert_invariants(&w.teamspaces).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_and_joins_by_one_user_admit_exactly_one() {
    let w = laggy_world().await;
    let mut teams = Vec::new();
    for organizer in ["o1", "o2"] {
        teams.push(w.lifecycle.create(organizer).await.unwrap());
    }

    let mut attempts = Vec::new();
    for round in 0..4 {
        let lifecycle = w.lifecycle.clone();
        attempts.push(tokio::spawn(async move {
            lifecycle.create("alice").await.map(|_| ())
        }));
        let lifecycle = w.lifecycle.clone();
        let team = teams[round % teams.len()];
        attempts.push(tokio::spawn(async move {
            lifecycle.join("alice", team).await.map(|_| ())
        }));
    }

    let mut successes = 0;
    for result in join_all(attempts).await {
        match result.unwrap() {
            Ok(()) => successes += 1,
            Err(ServiceError::UserAlreadyInTeam | ServiceError::AlreadyJoined) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_invariants(&w.teamspaces).await;
}

#[tokio::test]
async fn join_that_overruns_its_timeout_changes_nothing() {
    let store = LaggyRecordStore::default();
    let stall = store.stall_updates.clone();
    let config = AppConfig {
        operation_timeout: Duration::from_millis(100),
        ..AppConfig::default()
    };
    let w = world_on(Arc::new(store), config).await;
    let team = w.lifecycle.create("alice").await.unwrap();

    stall.store(true, Ordering::SeqCst);
    let err = w.lifecycle.join("bob", team).await.unwrap_err();
    stall.store(false, Ordering::SeqCst);

    assert!(matches!(err, ServiceError::Timeout));
    assert_eq!(AppError::from(err).code(), ErrorCode::InternalServerError);
    assert_eq!(
        w.lifecycle.list_members(team).await.unwrap(),
        vec!["alice".to_string()]
    );

    // The reservation left behind by the abandoned join expires with the operation timeout.
    sleep(Duration::from_millis(150)).await;
    w.lifecycle.join("bob", team).await.unwrap();
    assert_eq!(
        w.lifecycle.list_members(team).await.unwrap(),
        vec!["alice".to_string(), "bob".to_string()]
    );
}

#[tokio::test]
async fn operations_fail_while_degraded() {
    let state = AppState::new(
        AppConfig {
            operation_timeout: Duration::from_millis(100),
            ..AppConfig::default()
        },
        AuthMode::Bypass,
    );

    assert!(matches!(
        state.lifecycle().await.map(|_| ()),
        Err(ServiceError::Degraded)
    ));
}
