use serde_json::json;
use std::time::Duration;
use vocalis_db::{create_pool, seed_demo, AccessClient, AccessPolicy, DbRuntimeSettings};
use vocalis_tools::{build_registry, ToolRegistry, DEFAULT_TOOL_NAMES};
use vocalis_types::{ToolErrorKind, ToolInvocation, ToolPayload, ToolResult};

struct Fixture {
    _file: tempfile::NamedTempFile,
    client: AccessClient,
    registry: ToolRegistry,
}

fn fixture(available: &[&str]) -> Fixture {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let path = file.path().to_str().expect("utf-8 path").to_string();
    seed_demo(&path).expect("seed demo");
    let pool = create_pool(&path, DbRuntimeSettings::default()).expect("pool");
    let client = AccessClient::new(pool, AccessPolicy::default());
    let available: Vec<String> = available.iter().map(|s| s.to_string()).collect();
    let registry =
        build_registry(&client, &available, Duration::from_secs(5)).expect("registry");
    Fixture {
        _file: file,
        client,
        registry,
    }
}

#[tokio::test]
async fn registers_all_tools_in_order() {
    let fx = fixture(&[]);
    assert_eq!(fx.registry.tool_names(), DEFAULT_TOOL_NAMES.to_vec());
}

#[tokio::test]
async fn available_list_filters_tools() {
    let fx = fixture(&["get_table_count", "nonexistent_tool", "list_database_tables"]);
    assert_eq!(
        fx.registry.tool_names(),
        vec!["list_database_tables", "get_table_count"]
    );
}

#[tokio::test]
async fn count_users_renders_ten() {
    let fx = fixture(&[]);
    let result = fx
        .registry
        .dispatch(&ToolInvocation::new(
            "query_database",
            json!({"query": "SELECT COUNT(*) FROM usuarios"}),
        ))
        .await;
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.to_model_text(), "10");

    let result = fx
        .registry
        .dispatch(&ToolInvocation::new(
            "get_table_count",
            json!({"table_name": "usuarios"}),
        ))
        .await;
    assert_eq!(result.to_model_text(), "Table 'usuarios' has 10 records.");
}

#[tokio::test]
async fn drop_table_is_a_permission_failure() {
    let fx = fixture(&[]);
    let result = fx
        .registry
        .dispatch(&ToolInvocation::new(
            "query_database",
            json!({"query": "DROP TABLE usuarios"}),
        ))
        .await;
    assert_eq!(result.error_kind(), Some(ToolErrorKind::Permission));
    assert!(result.to_model_text().starts_with("error (permission_error):"));
    assert_eq!(fx.client.count_rows("usuarios").unwrap(), 10);
}

#[tokio::test]
async fn unknown_table_is_a_validation_failure() {
    let fx = fixture(&[]);
    let result = fx
        .registry
        .dispatch(&ToolInvocation::new(
            "describe_table",
            json!({"table_name": "clientes"}),
        ))
        .await;
    assert_eq!(result.error_kind(), Some(ToolErrorKind::Validation));
}

#[tokio::test]
async fn list_tables_hides_internal_tables() {
    let fx = fixture(&[]);
    let result = fx
        .registry
        .dispatch(&ToolInvocation::new("list_database_tables", json!({})))
        .await;
    assert_eq!(
        result,
        ToolResult::Success(ToolPayload::Tables {
            tables: vec!["pedidos".to_string(), "usuarios".to_string()]
        })
    );
}

#[tokio::test]
async fn select_rows_filters_by_value() {
    let fx = fixture(&[]);
    let result = fx
        .registry
        .dispatch(&ToolInvocation::new(
            "select_rows",
            json!({
                "table_name": "usuarios",
                "columns": ["nombre"],
                "where_column": "ciudad",
                "where_value": "Barcelona"
            }),
        ))
        .await;
    let ToolResult::Success(ToolPayload::Rows(rows)) = &result else {
        panic!("unexpected result: {result:?}");
    };
    assert_eq!(rows.len(), 2);
    assert!(result.to_model_text().starts_with("Found 2 results:"));
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let fx = fixture(&[]);
    let call = ToolInvocation::new(
        "query_database",
        json!({"query": "SELECT id, nombre FROM usuarios ORDER BY id"}),
    );
    let first = fx.registry.dispatch(&call).await;
    let second = fx.registry.dispatch(&call).await;
    assert!(first.is_success());
    assert_eq!(first, second);
}

#[tokio::test]
async fn exhausted_pool_surfaces_as_tool_failure() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap().to_string();
    seed_demo(&path).unwrap();
    let pool = create_pool(
        &path,
        DbRuntimeSettings {
            pool_max_size: 1,
            acquire_timeout_ms: 100,
            ..DbRuntimeSettings::default()
        },
    )
    .unwrap();
    let client = AccessClient::new(
        pool.clone(),
        AccessPolicy {
            acquire_timeout: Duration::from_millis(100),
            ..AccessPolicy::default()
        },
    );
    let registry = build_registry(&client, &[], Duration::from_secs(5)).unwrap();

    let held = pool.get().unwrap();
    let result = registry
        .dispatch(&ToolInvocation::new(
            "get_table_count",
            json!({"table_name": "usuarios"}),
        ))
        .await;
    assert_eq!(result.error_kind(), Some(ToolErrorKind::PoolExhausted));

    drop(held);
    let result = registry
        .dispatch(&ToolInvocation::new(
            "get_table_count",
            json!({"table_name": "usuarios"}),
        ))
        .await;
    assert!(result.is_success());
}
