//! Multi-viewer collaboration scenarios
//!
//! Every viewer gets its own connection and talks to one shared server state
//! through the in-process transport, exactly as separate browser tabs would.

use std::time::Duration;

use annotation_server::annotations::Author;
use annotation_server::client::{
    ClientConnection, DocumentViewer, LocalDocumentApi, LocalTransport, ViewerState,
};
use annotation_server::config::Config;
use annotation_server::db::create_memory_pool;
use annotation_server::documents::{Document, DocumentRepository, NewDocument, NewUser, UserRepository};
use annotation_server::AppState;

type Connection = ClientConnection<LocalTransport>;
type Viewer = DocumentViewer<LocalDocumentApi>;

async fn server() -> AppState {
    AppState::new(Config::default(), create_memory_pool().await.unwrap())
}

async fn upload(state: &AppState, content: &str) -> Document {
    DocumentRepository::new(state.db())
        .create(NewDocument {
            original_name: "shared.txt".into(),
            content: content.into(),
            uploaded_by: None,
        })
        .await
        .unwrap()
}

async fn user(state: &AppState, name: &str) -> Author {
    UserRepository::new(state.db())
        .find_or_create(&NewUser {
            username: name.into(),
            email: format!("{}@example.com", name),
        })
        .await
        .unwrap()
        .author()
}

async fn open(state: &AppState, author: &Author, document: &Document) -> (Viewer, Connection) {
    let mut connection = ClientConnection::new(LocalTransport::connect(state));
    let viewer = DocumentViewer::open(
        LocalDocumentApi::new(state.clone()),
        author.clone(),
        &document.id,
        &mut connection,
    )
    .await;
    assert_eq!(viewer.state(), &ViewerState::Ready);
    (viewer, connection)
}

async fn pump(connection: &mut Connection) {
    tokio::time::timeout(Duration::from_secs(5), connection.pump())
        .await
        .expect("no event within 5s")
        .unwrap();
}

/// Give forwarders a chance to deliver anything in flight, then drain
async fn settle(connection: &mut Connection) -> usize {
    tokio::time::sleep(Duration::from_millis(50)).await;
    connection.pump_pending()
}

fn strip(html: &str) -> String {
    let mut text = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    html_escape::decode_html_entities(&text).into_owned()
}

#[tokio::test]
async fn test_annotation_reaches_second_viewer() {
    let state = server().await;
    let document = upload(&state, "The quick brown fox").await;
    let ada = user(&state, "ada").await;
    let grace = user(&state, "grace").await;

    let (author_view, mut author_conn) = open(&state, &ada, &document).await;
    let (other_view, mut other_conn) = open(&state, &grace, &document).await;
    let before = other_view.annotation_count();

    let range = author_view.select(4, 9).unwrap();
    author_view.submit(&mut author_conn, &range, "typo?").await.unwrap();

    pump(&mut other_conn).await;
    pump(&mut author_conn).await;

    assert_eq!(other_view.annotation_count(), before + 1);
    let front = &other_view.annotations()[0];
    assert_eq!(front.start_index, 4);
    assert_eq!(front.end_index, 9);
    assert_eq!(front.selected_text, "quick");
    assert_eq!(front.comment, "typo?");
    assert_eq!(front.username, "ada");
    assert!(!other_view.can_delete(front));

    // the author's own echo is inserted exactly once
    assert_eq!(author_view.annotation_count(), 1);
    assert_eq!(settle(&mut author_conn).await, 0);
}

#[tokio::test]
async fn test_concurrent_overlapping_annotations() {
    let state = server().await;
    let raw = "0123456789abcdefghij";
    let document = upload(&state, raw).await;
    let ada = user(&state, "ada").await;
    let grace = user(&state, "grace").await;

    let (ada_view, mut ada_conn) = open(&state, &ada, &document).await;
    let (grace_view, mut grace_conn) = open(&state, &grace, &document).await;

    let first = ada_view.select(2, 10).unwrap();
    let second = grace_view.select(5, 15).unwrap();
    let (a, b) = tokio::join!(
        ada_view.submit(&mut ada_conn, &first, "first"),
        grace_view.submit(&mut grace_conn, &second, "second"),
    );
    a.unwrap();
    b.unwrap();

    for conn in [&mut ada_conn, &mut grace_conn] {
        pump(conn).await;
        pump(conn).await;
    }

    let listed = state.annotations().list(&document.id).await.unwrap();
    assert_eq!(listed.len(), 2);

    // both viewers converge on the same order
    let ids = |v: &Viewer| v.annotations().into_iter().map(|a| a.id).collect::<Vec<_>>();
    assert_eq!(ids(&ada_view), ids(&grace_view));

    for view in [&ada_view, &grace_view] {
        let rendered = view.rendered().unwrap();
        assert_eq!(rendered.marked, 2);
        assert_eq!(strip(&rendered.html), raw);
    }
}

#[tokio::test]
async fn test_departed_viewer_is_unaffected_by_delete() {
    let state = server().await;
    let document = upload(&state, "The quick brown fox").await;
    let ada = user(&state, "ada").await;
    let grace = user(&state, "grace").await;
    let alan = user(&state, "alan").await;

    let (ada_view, mut ada_conn) = open(&state, &ada, &document).await;
    let (grace_view, mut grace_conn) = open(&state, &grace, &document).await;
    let (alan_view, mut alan_conn) = open(&state, &alan, &document).await;

    for (start, end) in [(4, 9), (10, 15)] {
        let range = ada_view.select(start, end).unwrap();
        ada_view.submit(&mut ada_conn, &range, "note").await.unwrap();
    }
    for conn in [&mut ada_conn, &mut grace_conn, &mut alan_conn] {
        pump(conn).await;
        pump(conn).await;
    }
    assert_eq!(alan_view.annotation_count(), 2);

    grace_view.close(&mut grace_conn).await.unwrap();

    let doomed = ada_view.annotations()[0].id.clone();
    ada_view.delete(&mut ada_conn, &doomed).await.unwrap();

    pump(&mut alan_conn).await;
    assert_eq!(alan_view.annotation_count(), 1);
    assert!(alan_view.annotations().iter().all(|a| a.id != doomed));
    assert_eq!(settle(&mut grace_conn).await, 0);
}

#[tokio::test]
async fn test_retried_submission_is_coalesced() {
    let state = server().await;
    let document = upload(&state, "The quick brown fox").await;
    let ada = user(&state, "ada").await;
    let grace = user(&state, "grace").await;

    let (ada_view, mut ada_conn) = open(&state, &ada, &document).await;
    let (grace_view, mut grace_conn) = open(&state, &grace, &document).await;

    let range = ada_view.select(4, 9).unwrap();
    ada_view.submit(&mut ada_conn, &range, "typo?").await.unwrap();
    ada_view.submit(&mut ada_conn, &range, "typo?").await.unwrap();

    pump(&mut grace_conn).await;
    assert_eq!(settle(&mut grace_conn).await, 0);
    assert_eq!(grace_view.annotation_count(), 1);
    assert_eq!(state.annotations().count(&document.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_non_author_delete_is_rejected_privately() {
    let state = server().await;
    let document = upload(&state, "The quick brown fox").await;
    let ada = user(&state, "ada").await;
    let grace = user(&state, "grace").await;

    let (ada_view, mut ada_conn) = open(&state, &ada, &document).await;
    let (grace_view, mut grace_conn) = open(&state, &grace, &document).await;

    let range = ada_view.select(4, 9).unwrap();
    ada_view.submit(&mut ada_conn, &range, "typo?").await.unwrap();
    pump(&mut ada_conn).await;
    pump(&mut grace_conn).await;

    let target = grace_view.annotations()[0].id.clone();
    grace_view.delete(&mut grace_conn, &target).await.unwrap();
    pump(&mut grace_conn).await;

    let notices = grace_view.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].code, "authorization_error");
    assert_eq!(grace_view.annotation_count(), 1);

    assert_eq!(settle(&mut ada_conn).await, 0);
    assert!(ada_view.take_notices().is_empty());
    assert_eq!(ada_view.annotation_count(), 1);
    assert_eq!(state.annotations().count(&document.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_late_viewer_gets_baseline_most_recent_first() {
    let state = server().await;
    let document = upload(&state, "The quick brown fox").await;
    let ada = user(&state, "ada").await;
    let grace = user(&state, "grace").await;

    let (ada_view, mut ada_conn) = open(&state, &ada, &document).await;
    for (start, end, comment) in [(0, 3, "first"), (4, 9, "second"), (16, 19, "third")] {
        let range = ada_view.select(start, end).unwrap();
        ada_view.submit(&mut ada_conn, &range, comment).await.unwrap();
        pump(&mut ada_conn).await;
    }

    let (late_view, _late_conn) = open(&state, &grace, &document).await;
    let comments: Vec<String> = late_view.annotations().into_iter().map(|a| a.comment).collect();
    assert_eq!(comments, vec!["third", "second", "first"]);
    assert_eq!(
        late_view.annotations().into_iter().map(|a| a.id).collect::<Vec<_>>(),
        ada_view.annotations().into_iter().map(|a| a.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_invalid_submission_is_rejected_to_author_only() {
    let state = server().await;
    let document = upload(&state, "The quick brown fox").await;
    let ada = user(&state, "ada").await;
    let grace = user(&state, "grace").await;

    let (ada_view, mut ada_conn) = open(&state, &ada, &document).await;
    let (grace_view, mut grace_conn) = open(&state, &grace, &document).await;

    // a range that does not match the text never leaves the client
    let mut forged = ada_view.select(4, 9).unwrap();
    forged.selected_text = "quack".into();
    assert!(ada_view.submit(&mut ada_conn, &forged, "x").await.is_err());

    // one that slips past the client is rejected by the server
    let comment = "x".repeat(Config::default().annotations.max_comment_chars + 1);
    let range = ada_view.select(4, 9).unwrap();
    ada_view.submit(&mut ada_conn, &range, &comment).await.unwrap();
    pump(&mut ada_conn).await;

    let notices = ada_view.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].code, "validation_error");
    assert_eq!(settle(&mut grace_conn).await, 0);
    assert!(grace_view.take_notices().is_empty());
    assert_eq!(ada_view.annotation_count(), 0);
}
