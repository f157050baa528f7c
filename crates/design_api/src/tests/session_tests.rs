use super::*;
use shared::domain::UserId;

fn user(id: &str) -> SessionUser {
    SessionUser {
        id: UserId::from(id),
        email: Some(format!("{id}@example.com")),
    }
}

#[test]
fn starts_from_the_initial_identity() {
    assert_eq!(SessionCell::init(None).current(), None);
    let cell = SessionCell::init(Some(user("alice")));
    assert_eq!(cell.current(), Some(user("alice")));
}

#[tokio::test]
async fn notifies_only_on_actual_change() {
    let cell = SessionCell::init(None);
    let mut rx = cell.subscribe();

    cell.set(user("alice"));
    assert!(rx.has_changed().expect("open"));
    rx.borrow_and_update();

    cell.set(user("alice"));
    assert!(!rx.has_changed().expect("open"));

    cell.set(user("bob"));
    assert!(rx.has_changed().expect("open"));
    assert_eq!(rx.borrow_and_update().as_ref(), Some(&user("bob")));
}

#[tokio::test]
async fn sign_out_returns_previous_user_once() {
    let cell = SessionCell::init(Some(user("alice")));
    let mut rx = cell.subscribe();

    assert_eq!(cell.sign_out(), Some(user("alice")));
    assert!(rx.has_changed().expect("open"));
    rx.borrow_and_update();

    assert_eq!(cell.sign_out(), None);
    assert!(!rx.has_changed().expect("open"));
    assert_eq!(cell.current(), None);
}

#[tokio::test]
async fn clones_share_one_identity() {
    let cell = SessionCell::init(None);
    let other = cell.clone();
    other.set(user("carol"));
    assert_eq!(cell.current(), Some(user("carol")));
}

#[tokio::test]
async fn receivers_close_when_every_cell_is_dropped() {
    let cell = SessionCell::init(None);
    let mut rx = cell.subscribe();
    drop(cell);
    assert!(rx.changed().await.is_err());
}
