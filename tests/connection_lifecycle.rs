//! Pairing requests: create, accept, reject, and the live view.

mod common;

use duo::{
    connections::{self, ConnectionStatus, Role},
    profiles, AppError,
};
use tokio::time::timeout;

#[tokio::test]
async fn search_creates_one_pending_connection() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;
    let bob = common::user(&store, "bob", "b@x").await;

    let connection = connections::create(&store, &alice.id, "B@x").await.unwrap();

    assert_eq!(connection.initiator_id, alice.id);
    assert_eq!(connection.target_id, bob.id);
    assert_eq!(connection.status, ConnectionStatus::Pending);

    let stored = common::connections_between(&store, &alice.id, &bob.id).await;
    assert_eq!(stored, vec![connection]);
}

#[tokio::test]
async fn searching_own_email_is_refused() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;

    let err = connections::create(&store, &alice.id, " A@X ").await.unwrap_err();
    assert!(matches!(err, AppError::SelfReference));

    assert!(connections::active_connection(&store, &alice.id).await.unwrap().is_none());
    assert!(common::connections_between(&store, &alice.id, &alice.id).await.is_empty());
}

#[tokio::test]
async fn unknown_email_is_not_found() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;

    let err = connections::create(&store, &alice.id, "ghost@x").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(connections::active_connection(&store, &alice.id).await.unwrap().is_none());
}

#[tokio::test]
async fn blank_email_is_a_validation_failure() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;

    let err = connections::create(&store, &alice.id, "   ").await.unwrap_err();
    assert!(matches!(err, AppError::ValidationFailure(_)));
}

#[tokio::test]
async fn accept_links_both_profiles() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;
    let bob = common::user(&store, "bob", "b@x").await;

    let pending = connections::create(&store, &alice.id, "b@x").await.unwrap();

    let alice_view = connections::view(&store, &alice.id).await.unwrap();
    let bob_view = connections::view(&store, &bob.id).await.unwrap();
    assert_eq!(alice_view.role, Some(Role::PendingSender));
    assert_eq!(bob_view.role, Some(Role::PendingReceiver));
    assert_eq!(bob_view.partner, None);

    let accepted = connections::accept(&store, &bob.id, &pending.id).await.unwrap();
    assert_eq!(accepted.status, ConnectionStatus::Accepted);

    let alice = profiles::get_profile(&store, "alice").await.unwrap().unwrap();
    let bob = profiles::get_profile(&store, "bob").await.unwrap().unwrap();
    assert_eq!(alice.partner_id.as_deref(), Some("bob"));
    assert_eq!(bob.partner_id.as_deref(), Some("alice"));

    let alice_view = connections::view(&store, &alice.id).await.unwrap();
    assert_eq!(alice_view.role, Some(Role::Paired));
    assert_eq!(alice_view.partner, Some(bob.clone()));
    let bob_view = connections::view(&store, &bob.id).await.unwrap();
    assert_eq!(bob_view.partner, Some(alice));
}

#[tokio::test]
async fn only_the_target_can_respond() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;
    common::user(&store, "bob", "b@x").await;
    common::user(&store, "carol", "c@x").await;
    let pending = connections::create(&store, &alice.id, "b@x").await.unwrap();

    let err = connections::accept(&store, &alice.id, &pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));

    let err = connections::reject(&store, "carol", &pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let stored = connections::get_connection(&store, &pending.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Pending);
}

#[tokio::test]
async fn accept_is_all_or_nothing() {
    let store = common::store().await;
    common::user(&store, "alice", "a@x").await;
    common::user(&store, "bob", "b@x").await;
    let pending = connections::create(&store, "alice", "b@x").await.unwrap();

    // the initiator's profile disappears, so the second partner link fails
    sqlx::query("DELETE FROM profiles WHERE namespace=? AND id=?")
        .bind(&store.namespace)
        .bind("alice")
        .execute(&store.pool)
        .await
        .unwrap();

    let err = connections::accept(&store, "bob", &pending.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let stored = connections::get_connection(&store, &pending.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ConnectionStatus::Pending);
    let bob = profiles::get_profile(&store, "bob").await.unwrap().unwrap();
    assert_eq!(bob.partner_id, None);
}

#[tokio::test]
async fn accepting_twice_is_refused() {
    let store = common::store().await;
    let (_alice, bob, accepted) = common::paired(&store).await;

    let err = connections::accept(&store, &bob.id, &accepted.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
    let err = connections::reject(&store, &bob.id, &accepted.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

#[tokio::test]
async fn reject_is_terminal_and_frees_both_sides() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;
    let bob = common::user(&store, "bob", "b@x").await;
    let pending = connections::create(&store, &alice.id, "b@x").await.unwrap();

    let rejected = connections::reject(&store, &bob.id, &pending.id).await.unwrap();
    assert_eq!(rejected.status, ConnectionStatus::Rejected);

    assert!(connections::active_connection(&store, &alice.id).await.unwrap().is_none());
    assert_eq!(connections::view(&store, &bob.id).await.unwrap(), Default::default());
    let alice = profiles::get_profile(&store, "alice").await.unwrap().unwrap();
    assert_eq!(alice.partner_id, None);

    // the pair may try again; the rejected row stays behind
    let retry = connections::create(&store, &alice.id, "b@x").await.unwrap();
    let rows = common::connections_between(&store, &alice.id, &bob.id).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, ConnectionStatus::Rejected);
    assert_eq!(rows[1], retry);
}

#[tokio::test]
async fn one_live_connection_per_identity() {
    let store = common::store().await;
    let alice = common::user(&store, "alice", "a@x").await;
    common::user(&store, "bob", "b@x").await;
    let carol = common::user(&store, "carol", "c@x").await;

    let first = connections::create(&store, &alice.id, "b@x").await.unwrap();

    for (from, to) in [(&carol.id, "a@x"), (&carol.id, "b@x"), (&alice.id, "c@x")] {
        let err = connections::create(&store, from, to).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyConnected), "{from} -> {to}");
    }

    assert!(connections::active_connection(&store, &carol.id).await.unwrap().is_none());
    assert_eq!(connections::active_connection(&store, &alice.id).await.unwrap(), Some(first));
}

#[tokio::test]
async fn racing_requests_leave_one_winner() {
    let store = common::store().await;
    common::user(&store, "alice", "a@x").await;
    common::user(&store, "bob", "b@x").await;
    common::user(&store, "carol", "c@x").await;

    let (from_alice, from_carol) = tokio::join!(
        connections::create(&store, "alice", "b@x"),
        connections::create(&store, "carol", "b@x"),
    );

    assert_eq!([from_alice.is_ok(), from_carol.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert!(connections::active_connection(&store, "bob").await.unwrap().is_some());
}

#[tokio::test]
async fn watch_follows_the_lifecycle() {
    let store = common::store().await;
    common::user(&store, "alice", "a@x").await;
    common::user(&store, "bob", "b@x").await;

    let mut bob_views = connections::watch(&store, "bob").await.unwrap();
    let initial = timeout(common::WAIT, bob_views.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(initial.connection, None);

    let pending = connections::create(&store, "alice", "b@x").await.unwrap();
    let view = timeout(common::WAIT, bob_views.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.role, Some(Role::PendingReceiver));

    connections::accept(&store, "bob", &pending.id).await.unwrap();
    let view = timeout(common::WAIT, bob_views.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.role, Some(Role::Paired));
    assert_eq!(view.partner.map(|p| p.id).as_deref(), Some("alice"));
}

#[tokio::test]
async fn watch_ignores_unrelated_pairs() {
    let store = common::store().await;
    common::user(&store, "alice", "a@x").await;
    common::user(&store, "bob", "b@x").await;
    common::user(&store, "carol", "c@x").await;
    common::user(&store, "dave", "d@x").await;

    let mut carol_views = connections::watch(&store, "carol").await.unwrap();
    carol_views.next().await.unwrap();

    connections::create(&store, "alice", "b@x").await.unwrap();
    assert!(timeout(std::time::Duration::from_millis(100), carol_views.next()).await.is_err());

    connections::create(&store, "dave", "c@x").await.unwrap();
    let view = timeout(common::WAIT, carol_views.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.role, Some(Role::PendingReceiver));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_responses_settle_on_one_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let store = common::file_store(&dir).await;

    for round in 0..10 {
        let alice = common::user(&store, &format!("alice-{round}"), &format!("a{round}@x")).await;
        let bob = common::user(&store, &format!("bob-{round}"), &format!("b{round}@x")).await;
        let pending = connections::create(&store, &alice.id, &bob.email).await.unwrap();

        let accepting = tokio::spawn({
            let (store, bob, id) = (store.clone(), bob.id.clone(), pending.id.clone());
            async move { connections::accept(&store, &bob, &id).await }
        });
        let rejecting = tokio::spawn({
            let (store, bob, id) = (store.clone(), bob.id.clone(), pending.id.clone());
            async move { connections::reject(&store, &bob, &id).await }
        });
        let (accepted, rejected) = tokio::join!(accepting, rejecting);
        let (accepted, rejected) = (accepted.unwrap(), rejected.unwrap());

        let winner = match (&accepted, &rejected) {
            (Ok(connection), Err(err)) | (Err(err), Ok(connection)) => {
                assert!(matches!(err, AppError::InvalidTransition(_)), "round {round}: {err}");
                connection.status
            }
            _ => panic!("round {round}: expected exactly one response to win, got {accepted:?} and {rejected:?}"),
        };

        let stored = connections::get_connection(&store, &pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, winner);
        let bob = profiles::get_profile(&store, &bob.id).await.unwrap().unwrap();
        assert_eq!(bob.partner_id.is_some(), winner == ConnectionStatus::Accepted);
    }
}
