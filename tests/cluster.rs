use std::sync::Arc;
use std::time::Duration;

use raftkv::kv::Kv;
use raftkv::node::Node;
use raftkv::{applier, consensus};
use serde::Deserialize;
use tokio::net::TcpListener;

#[derive(Deserialize)]
struct WireResponse {
    #[serde(rename = "Status")]
    status: i32,
    #[serde(rename = "Data")]
    data: String,
}

async fn spawn_node(id: String, peers: Vec<String>) {
    let node = Arc::new(Node::new(id.clone(), peers, Kv::new()));
    let listener = TcpListener::bind(id.trim_start_matches("http://")).await.unwrap();
    let app = raftkv::transport::server::build(node.clone());
    tokio::spawn(consensus::run(node.clone()));
    tokio::spawn(applier::run(node.clone()));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
}

/// Binds three ephemeral ports up front so every node knows every peer's
/// address before any of them starts ticking.
async fn bind_three() -> (String, String, String) {
    let mut addrs = vec![];
    for _ in 0..3 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addrs.push(format!("http://{}", addr));
    }
    (addrs[0].clone(), addrs[1].clone(), addrs[2].clone())
}

async fn start_cluster() -> (String, String, String, reqwest::Client) {
    let (a, b, c) = bind_three().await;
    spawn_node(a.clone(), vec![b.clone(), c.clone()]).await;
    spawn_node(b.clone(), vec![a.clone(), c.clone()]).await;
    spawn_node(c.clone(), vec![a.clone(), b.clone()]).await;
    (a, b, c, reqwest::Client::new())
}

/// Polls every node's `/get_leader` until one reports a non-empty leader,
/// per spec.md §6.
async fn wait_for_leader(client: &reqwest::Client, nodes: &[String]) -> String {
    for _ in 0..100 {
        for node in nodes {
            if let Ok(resp) = client.get(format!("{}/get_leader", node)).send().await {
                if let Ok(body) = resp.json::<WireResponse>().await {
                    if body.status == 0 && !body.data.is_empty() {
                        return body.data;
                    }
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("cluster never elected a leader");
}

#[tokio::test]
async fn cluster_elects_exactly_one_leader() {
    let (a, b, c, client) = start_cluster().await;
    let leader = wait_for_leader(&client, &[a, b, c]).await;
    assert!(!leader.is_empty());
}

#[tokio::test]
async fn add_on_leader_is_visible_via_lookup() {
    let (a, b, c, client) = start_cluster().await;
    let leader = wait_for_leader(&client, &[a, b, c]).await;

    let resp: WireResponse = client
        .get(format!("{}/add", leader))
        .query(&[("shortUrl", "abc"), ("redirect", "http://example.com")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.status, 0, "add should succeed on the leader: {}", resp.data);

    let resp: WireResponse = client.get(format!("{}/abc", leader)).send().await.unwrap().json().await.unwrap();
    assert_eq!(resp.status, 0);
    assert_eq!(resp.data, "http://example.com");
}

#[tokio::test]
async fn add_on_follower_redirects_to_leader() {
    let (a, b, c, client) = start_cluster().await;
    let nodes = [a, b, c];
    let leader = wait_for_leader(&client, &nodes).await;
    let follower = nodes.iter().find(|n| *n != &leader).unwrap();

    let resp: WireResponse = client
        .get(format!("{}/add", follower))
        .query(&[("shortUrl", "x"), ("redirect", "http://y")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.status, 2);
    assert_eq!(resp.data, leader);
}

#[tokio::test]
async fn duplicate_key_add_is_rejected() {
    let (a, b, c, client) = start_cluster().await;
    let leader = wait_for_leader(&client, &[a, b, c]).await;

    let first: WireResponse = client
        .get(format!("{}/add", leader))
        .query(&[("shortUrl", "dup"), ("redirect", "http://1")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first.status, 0);

    let second: WireResponse = client
        .get(format!("{}/add", leader))
        .query(&[("shortUrl", "dup"), ("redirect", "http://2")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second.status, 1);
}

#[tokio::test]
async fn delete_of_absent_key_is_rejected() {
    let (a, b, c, client) = start_cluster().await;
    let leader = wait_for_leader(&client, &[a, b, c]).await;

    let resp: WireResponse =
        client.get(format!("{}/delete/never-added", leader)).send().await.unwrap().json().await.unwrap();
    assert_eq!(resp.status, 1);
}

#[tokio::test]
async fn update_in_place_changes_value() {
    let (a, b, c, client) = start_cluster().await;
    let leader = wait_for_leader(&client, &[a, b, c]).await;

    client
        .get(format!("{}/add", leader))
        .query(&[("shortUrl", "k"), ("redirect", "http://v1")])
        .send()
        .await
        .unwrap();

    let resp: WireResponse = client
        .get(format!("{}/update/k", leader))
        .query(&[("shortUrl", "k"), ("redirect", "http://v2")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.status, 0);

    let resp: WireResponse = client.get(format!("{}/k", leader)).send().await.unwrap().json().await.unwrap();
    assert_eq!(resp.data, "http://v2");
}

#[tokio::test]
async fn fetch_lists_added_entries_space_separated() {
    let (a, b, c, client) = start_cluster().await;
    let leader = wait_for_leader(&client, &[a, b, c]).await;

    client
        .get(format!("{}/add", leader))
        .query(&[("shortUrl", "f"), ("redirect", "http://fetched")])
        .send()
        .await
        .unwrap();

    let resp: WireResponse = client.get(format!("{}/fetch", leader)).send().await.unwrap().json().await.unwrap();
    assert_eq!(resp.status, 0);
    assert!(resp.data.contains("f=http://fetched "));
}

#[tokio::test]
async fn add_replicates_to_followers_once_applied() {
    let (a, b, c, client) = start_cluster().await;
    let nodes = [a, b, c];
    let leader = wait_for_leader(&client, &nodes).await;

    let resp: WireResponse = client
        .get(format!("{}/add", leader))
        .query(&[("shortUrl", "repl"), ("redirect", "http://repl")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.status, 0);

    let follower = nodes.iter().find(|n| *n != &leader).unwrap();
    // The leader only returns once its own apply caught up; followers catch
    // up shortly after via the commit broadcast or their own gap-filling.
    for _ in 0..40 {
        let resp: WireResponse =
            client.get(format!("{}/repl", follower)).send().await.unwrap().json().await.unwrap();
        if resp.status == 0 {
            assert_eq!(resp.data, "http://repl");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("follower never converged on the new entry");
}

#[tokio::test]
async fn ping_always_succeeds() {
    let (a, _b, _c, client) = start_cluster().await;
    let resp: WireResponse = client.get(format!("{}/ping", a)).send().await.unwrap().json().await.unwrap();
    assert_eq!(resp.status, 0);
}
