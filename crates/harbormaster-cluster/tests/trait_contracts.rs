//! Behavioral contract tests for `ClusterClient` implementations.
//!
//! Any conforming backend must pass these; they run against both the
//! in-memory fake and the file-backed store.

use serde_json::json;

use harbormaster_cluster::fakes::FakeCluster;
use harbormaster_cluster::{
    ApplyOptions, ClusterClient, DesiredObject, FsCluster, LiveObject, ObjectKey,
};

fn desired(kind: &str, namespace: &str, name: &str) -> DesiredObject {
    DesiredObject::from_manifest(
        json!({
            "kind": kind,
            "metadata": { "name": name, "namespace": namespace },
            "spec": { "marker": name }
        }),
        namespace,
    )
    .unwrap()
}

async fn contract_apply_is_visible_to_get_and_list(client: &dyn ClusterClient) {
    let obj = desired("ConfigMap", "prod", "settings");
    let stored = client.apply(&obj, ApplyOptions::default()).await.unwrap();
    assert_eq!(stored.key, obj.key);

    let got = client.get(&obj.key).await.unwrap().unwrap();
    assert_eq!(got.body["spec"]["marker"], "settings");

    let listed = client.list("ConfigMap", "prod").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, obj.key);
}

async fn contract_apply_overwrites(client: &dyn ClusterClient) {
    let mut obj = desired("ConfigMap", "prod", "settings");
    client.apply(&obj, ApplyOptions::default()).await.unwrap();
    obj.body["spec"]["marker"] = json!("updated");
    client.apply(&obj, ApplyOptions::default()).await.unwrap();

    let got = client.get(&obj.key).await.unwrap().unwrap();
    assert_eq!(got.body["spec"]["marker"], "updated");
    assert_eq!(client.list("ConfigMap", "prod").await.unwrap().len(), 1);
}

async fn contract_delete_is_idempotent(client: &dyn ClusterClient) {
    let obj = desired("Service", "prod", "web");
    client.apply(&obj, ApplyOptions::default()).await.unwrap();
    client.delete(&obj.key).await.unwrap();
    assert!(client.get(&obj.key).await.unwrap().is_none());
    client.delete(&obj.key).await.unwrap();
}

async fn contract_list_scopes_by_kind_and_namespace(client: &dyn ClusterClient) {
    for (kind, ns, name) in [
        ("ConfigMap", "prod", "a"),
        ("ConfigMap", "staging", "b"),
        ("Service", "prod", "c"),
    ] {
        client
            .apply(&desired(kind, ns, name), ApplyOptions::default())
            .await
            .unwrap();
    }

    let listed = client.list("ConfigMap", "prod").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, ObjectKey::new("ConfigMap", "prod", "a"));
    assert!(client.list("Deployment", "prod").await.unwrap().is_empty());
}

#[tokio::test]
async fn fake_cluster_satisfies_contracts() {
    contract_apply_is_visible_to_get_and_list(&FakeCluster::new()).await;
    contract_apply_overwrites(&FakeCluster::new()).await;
    contract_delete_is_idempotent(&FakeCluster::new()).await;
    contract_list_scopes_by_kind_and_namespace(&FakeCluster::new()).await;
}

#[tokio::test]
async fn fs_cluster_satisfies_contracts() {
    let dirs: Vec<tempfile::TempDir> = (0..4).map(|_| tempfile::tempdir().unwrap()).collect();
    contract_apply_is_visible_to_get_and_list(&FsCluster::new(dirs[0].path()).unwrap()).await;
    contract_apply_overwrites(&FsCluster::new(dirs[1].path()).unwrap()).await;
    contract_delete_is_idempotent(&FsCluster::new(dirs[2].path()).unwrap()).await;
    contract_list_scopes_by_kind_and_namespace(&FsCluster::new(dirs[3].path()).unwrap()).await;
}

#[tokio::test]
async fn fs_cluster_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cluster = FsCluster::new(dir.path()).unwrap();
        cluster
            .apply(&desired("ConfigMap", "prod", "settings"), ApplyOptions::default())
            .await
            .unwrap();
    }

    let reopened = FsCluster::new(dir.path()).unwrap();
    let got: Option<LiveObject> = reopened
        .get(&ObjectKey::new("ConfigMap", "prod", "settings"))
        .await
        .unwrap();
    assert!(got.is_some());
}
