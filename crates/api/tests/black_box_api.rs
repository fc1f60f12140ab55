use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};

use splitledger_infra::{InMemoryLedgerStore, LedgerService, LedgerStore};

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory store, ephemeral port.
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let app = splitledger_api::app::build_app(LedgerService::new(store));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create_group(&self, owner: &str, members: &[&str]) -> String {
        let res = self
            .client
            .post(self.url("/groups"))
            .header("X-Member-Id", owner)
            .json(&json!({ "name": "Weekend trip" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        let group_id = body["group"]["id"].as_str().unwrap().to_string();

        for member in members {
            let res = self
                .client
                .post(self.url(&format!("/groups/{group_id}/members")))
                .header("X-Member-Id", owner)
                .json(&json!({ "member_id": member }))
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::CREATED);
        }
        group_id
    }

    async fn post_expense(&self, group_id: &str, member: &str, key: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/groups/{group_id}/expenses")))
            .header("X-Member-Id", member)
            .header("Idempotency-Key", key)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str, member: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.url(path))
            .header("X-Member-Id", member)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn even_split(payer: &str, total: i64, members: &[&str]) -> Value {
    json!({
        "payer": payer,
        "total": total,
        "split": { "kind": "even", "members": members },
    })
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn().await;
    let res = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn member_header_is_required() {
    let server = TestServer::spawn().await;
    let res = server
        .client
        .post(server.url("/groups"))
        .json(&json!({ "name": "No one" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn expense_then_balances_and_debts() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("alice", &["bob"]).await;

    let expense = json!({
        "description": "Dinner",
        "payer": "alice",
        "total": 1000,
        "split": { "kind": "exact", "shares": [
            { "member": "alice", "amount": 500 },
            { "member": "bob", "amount": 500 }
        ]},
    });
    let res = server.post_expense(&group_id, "alice", "k-dinner", &expense).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let (status, body) = server
        .get_json(&format!("/groups/{group_id}/balances"), "bob")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balances"]["alice"], 500);
    assert_eq!(body["balances"]["bob"], -500);

    let (status, body) = server
        .get_json(&format!("/groups/{group_id}/debts?mode=simplified"), "bob")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "simplified");
    assert_eq!(
        body["suggestions"],
        json!([{ "counterparty": "alice", "amount": -500, "direction": "PAYABLE" }])
    );
}

#[tokio::test]
async fn retried_key_replays_identical_response() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("x", &["y", "z"]).await;
    let body = even_split("x", 100, &["x", "y", "z"]);

    let first = server.post_expense(&group_id, "x", "k1", &body).await;
    assert_eq!(first.status(), StatusCode::CREATED);
    assert!(first.headers().get("idempotent-replayed").is_none());
    let first_body = first.bytes().await.unwrap();

    let second = server.post_expense(&group_id, "x", "k1", &body).await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(second.headers().get("idempotent-replayed").unwrap(), "true");
    let second_body = second.bytes().await.unwrap();
    assert_eq!(first_body, second_body);

    let created: Value = serde_json::from_slice(&first_body).unwrap();
    let amounts: Vec<i64> = created["expense"]["shares"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, vec![34, 33, 33]);

    let (_, page) = server
        .get_json(&format!("/groups/{group_id}/expenses"), "y")
        .await;
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn gate_errors_map_to_statuses() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("alice", &["bob"]).await;
    let body = even_split("alice", 100, &["alice", "bob"]);

    // No key.
    let res = server
        .client
        .post(server.url(&format!("/groups/{group_id}/expenses")))
        .header("X-Member-Id", "alice")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "idempotency_key_required");

    // Same key, different actor.
    let res = server.post_expense(&group_id, "alice", "k1", &body).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = server.post_expense(&group_id, "bob", "k1", &body).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Share sum off by one is rejected, and the rejection is replayed.
    let short = json!({
        "payer": "alice",
        "total": 100,
        "split": { "kind": "exact", "shares": [
            { "member": "alice", "amount": 50 },
            { "member": "bob", "amount": 49 }
        ]},
    });
    let res = server.post_expense(&group_id, "alice", "k2", &short).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = server.post_expense(&group_id, "alice", "k2", &short).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.headers().get("idempotent-replayed").unwrap(), "true");
}

#[tokio::test]
async fn settlement_replace_and_delete() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("alice", &["bob"]).await;

    let res = server
        .post_expense(&group_id, "alice", "e1", &even_split("alice", 1000, &["alice", "bob"]))
        .await;
    let created: Value = res.json().await.unwrap();
    let expense_id = created["expense"]["id"].as_str().unwrap().to_string();

    // Self-settlement is rejected.
    let res = server
        .client
        .post(server.url(&format!("/groups/{group_id}/settlements")))
        .header("X-Member-Id", "bob")
        .header("Idempotency-Key", "s0")
        .json(&json!({ "from": "bob", "to": "bob", "amount": 500 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server
        .client
        .post(server.url(&format!("/groups/{group_id}/settlements")))
        .header("X-Member-Id", "bob")
        .header("Idempotency-Key", "s1")
        .json(&json!({ "from": "bob", "to": "alice", "amount": 500 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let (_, body) = server
        .get_json(&format!("/groups/{group_id}/balances"), "alice")
        .await;
    assert_eq!(body["balances"], json!({ "alice": 0, "bob": 0 }));

    // Replace: bob pays 200 for both, alice now owes 100.
    let res = server
        .client
        .put(server.url(&format!("/expenses/{expense_id}")))
        .header("X-Member-Id", "alice")
        .header("Idempotency-Key", "r1")
        .json(&even_split("bob", 200, &["alice", "bob"]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (_, body) = server
        .get_json(&format!("/groups/{group_id}/balances"), "alice")
        .await;
    // Settlement of 500 still stands: bob +500 sent, -500 received by alice.
    assert_eq!(body["balances"], json!({ "alice": -600, "bob": 600 }));

    let res = server
        .client
        .delete(server.url(&format!("/expenses/{expense_id}")))
        .header("X-Member-Id", "alice")
        .header("Idempotency-Key", "d1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (_, page) = server
        .get_json(&format!("/groups/{group_id}/expenses"), "alice")
        .await;
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn outsiders_are_forbidden() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("alice", &["bob"]).await;

    let (status, _) = server
        .get_json(&format!("/groups/{group_id}/balances"), "mallory")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server.get_json("/groups/not-a-uuid/balances", "alice").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn toggle_mode_and_summary() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("a", &["b", "c"]).await;

    server
        .post_expense(&group_id, "a", "e1", &json!({
            "payer": "a", "total": 100,
            "split": { "kind": "exact", "shares": [{ "member": "b", "amount": 100 }] },
        }))
        .await;
    server
        .post_expense(&group_id, "b", "e2", &json!({
            "payer": "b", "total": 100,
            "split": { "kind": "exact", "shares": [{ "member": "c", "amount": 100 }] },
        }))
        .await;

    let (_, body) = server.get_json(&format!("/groups/{group_id}/debts"), "c").await;
    assert_eq!(body["mode"], "direct");
    assert_eq!(body["suggestions"][0]["counterparty"], "b");

    let res = server
        .client
        .patch(server.url(&format!("/groups/{group_id}/simplify-debts")))
        .header("X-Member-Id", "a")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let toggled: Value = res.json().await.unwrap();
    assert_eq!(toggled["settlement_mode"], "simplified");

    let (_, body) = server.get_json(&format!("/groups/{group_id}/debts"), "c").await;
    assert_eq!(body["suggestions"][0]["counterparty"], "a");

    let (status, body) = server.get_json("/me/summary?window=all_time", "a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_owed"], 100);
    assert_eq!(body["summary"]["people_owing"], 1);

    let (status, _) = server.get_json("/me/summary?window=fortnight", "a").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn member_removal_waits_for_settled_debts() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("alice", &["bob"]).await;
    server
        .post_expense(&group_id, "alice", "e1", &even_split("alice", 1000, &["alice", "bob"]))
        .await;

    let remove = |requester: &'static str, member: &'static str| {
        server
            .client
            .delete(server.url(&format!("/groups/{group_id}/members/{member}")))
            .header("X-Member-Id", requester)
            .send()
    };

    let res = remove("alice", "bob").await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "outstanding_debts");
    assert_eq!(body["details"][0]["counterparty"], "alice");
    assert_eq!(body["details"][0]["amount"], -500);

    assert_eq!(remove("alice", "alice").await.unwrap().status(), StatusCode::BAD_REQUEST);
    assert_eq!(remove("mallory", "bob").await.unwrap().status(), StatusCode::FORBIDDEN);
    assert_eq!(remove("alice", "zed").await.unwrap().status(), StatusCode::NOT_FOUND);

    let res = server
        .client
        .post(server.url(&format!("/groups/{group_id}/settlements")))
        .header("X-Member-Id", "bob")
        .header("Idempotency-Key", "s1")
        .json(&json!({ "from": "bob", "to": "alice", "amount": 500 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = remove("alice", "bob").await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["removed"], true);

    // bob's history still counts.
    let (_, body) = server
        .get_json(&format!("/groups/{group_id}/balances"), "alice")
        .await;
    assert_eq!(body["balances"], json!({ "alice": 0, "bob": 0 }));

    let (status, _) = server
        .get_json(&format!("/groups/{group_id}/balances"), "bob")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn activity_feed_is_newest_first_and_paged() {
    let server = TestServer::spawn().await;
    let group_id = server.create_group("alice", &["bob"]).await;
    server
        .post_expense(&group_id, "alice", "e1", &even_split("alice", 400, &["alice", "bob"]))
        .await;

    let (status, page) = server.get_json("/me/activities?limit=1", "bob").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["has_more"], true);
    assert_eq!(page["items"][0]["kind"], "expense_create");
    assert_eq!(page["items"][0]["member"], "alice");
    assert_eq!(page["items"][0]["metadata"]["amount"], 400);

    let (_, page) = server.get_json("/me/activities?limit=1&offset=1", "bob").await;
    assert_eq!(page["items"][0]["kind"], "group_join");
    assert_eq!(page["items"][0]["member"], "bob");
    assert_eq!(page["has_more"], false);

    let (_, page) = server.get_json("/me/activities", "mallory").await;
    assert_eq!(page["total"], 0);
}
