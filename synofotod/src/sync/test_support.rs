use serde_json::{Value, json};
use synofoto_core::{ClientOptions, Credentials, Scope, SynoClient};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) const OWN_USER_ID: i64 = 7;

fn folder_api(scope: Scope) -> &'static str {
    match scope {
        Scope::Personal => "SYNO.Foto.Browse.Folder",
        Scope::Shared => "SYNO.FotoTeam.Browse.Folder",
    }
}

pub(crate) fn make_client(server: &MockServer) -> SynoClient {
    let options = ClientOptions {
        timeout: std::time::Duration::from_secs(5),
        ..ClientOptions::default()
    };
    SynoClient::with_options(&server.uri(), Credentials::new("frame", "secret"), options)
        .unwrap()
}

pub(crate) async fn mount_session(server: &MockServer) {
    let apis: serde_json::Map<String, Value> = [
        "SYNO.API.Auth",
        "SYNO.Foto.UserInfo",
        "SYNO.Foto.Browse.Album",
        "SYNO.Foto.Browse.Item",
        "SYNO.Foto.Browse.Folder",
        "SYNO.FotoTeam.Browse.Folder",
    ]
    .into_iter()
    .map(|api| (api.to_string(), json!({ "path": "entry.cgi", "minVersion": 1, "maxVersion": 6 })))
    .collect();
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", "SYNO.API.Info"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": apis })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", "SYNO.API.Auth"))
        .and(query_param("method", "login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "sid": "sid-1" }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", "SYNO.API.Auth"))
        .and(query_param("method", "logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", "SYNO.Foto.UserInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "id": OWN_USER_ID }
        })))
        .mount(server)
        .await;
}

pub(crate) async fn mount_root(server: &MockServer, scope: Scope, id: i64, name: &str) {
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", folder_api(scope)))
        .and(query_param("method", "get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "folder": { "id": id, "name": name, "passphrase": "" } }
        })))
        .mount(server)
        .await;
}

pub(crate) async fn mount_children(
    server: &MockServer,
    scope: Scope,
    parent: Option<i64>,
    children: &[(i64, &str)],
) {
    let list: Vec<Value> = children
        .iter()
        .map(|(id, name)| json!({ "id": id, "name": name, "passphrase": format!("p{id}") }))
        .collect();
    let mock = Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", folder_api(scope)))
        .and(query_param("method", "list"));
    let mock = match parent {
        Some(parent) => mock.and(query_param("id", parent.to_string())),
        None => mock.and(query_param_is_missing("id")),
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": { "list": list }
    })))
    .mount(server)
    .await;
}

/// Mounts a scope whose only folder is its root, with no children.
pub(crate) async fn mount_empty_scope(server: &MockServer, scope: Scope, root_id: i64) {
    mount_root(server, scope, root_id, "/").await;
    mount_children(server, scope, None, &[]).await;
}

pub(crate) async fn mount_albums(server: &MockServer, albums: Value) {
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", "SYNO.Foto.Browse.Album"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "list": albums }
        })))
        .mount(server)
        .await;
}

pub(crate) async fn mount_album_items(
    server: &MockServer,
    passphrase: &str,
    items: Value,
    expected_calls: u64,
) {
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", "SYNO.Foto.Browse.Item"))
        .and(query_param("passphrase", passphrase))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "list": items }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}
