use std::time::{Duration, Instant};
use vocalis_db::{
    create_pool, seed_demo, AccessClient, AccessPolicy, DbError, DbRuntimeSettings, QueryOutput,
    QueryRequest,
};
use vocalis_types::ToolErrorKind;

fn seeded_file() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    seed_demo(file.path().to_str().expect("utf-8 path")).expect("seed demo");
    file
}

fn client(file: &tempfile::NamedTempFile, pool_size: u32, wait: Duration) -> AccessClient {
    let pool = create_pool(
        file.path().to_str().expect("utf-8 path"),
        DbRuntimeSettings {
            pool_max_size: pool_size,
            acquire_timeout_ms: wait.as_millis() as u64,
            ..DbRuntimeSettings::default()
        },
    )
    .expect("pool");
    AccessClient::new(
        pool,
        AccessPolicy {
            acquire_timeout: wait,
            ..AccessPolicy::default()
        },
    )
}

#[test]
fn exhausted_pool_fails_within_bound() {
    let file = seeded_file();
    let pool = create_pool(
        file.path().to_str().unwrap(),
        DbRuntimeSettings {
            pool_max_size: 1,
            acquire_timeout_ms: 150,
            ..DbRuntimeSettings::default()
        },
    )
    .unwrap();
    let client = AccessClient::new(
        pool.clone(),
        AccessPolicy {
            acquire_timeout: Duration::from_millis(150),
            ..AccessPolicy::default()
        },
    );

    let _held = pool.get().expect("only connection");
    let started = Instant::now();
    let err = client.count_rows("usuarios").unwrap_err();
    assert!(matches!(err, DbError::PoolExhausted { .. }), "{err:?}");
    assert_eq!(err.kind(), ToolErrorKind::PoolExhausted);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn rejected_writes_never_wait_for_a_connection() {
    let file = seeded_file();
    let pool = create_pool(
        file.path().to_str().unwrap(),
        DbRuntimeSettings {
            pool_max_size: 1,
            acquire_timeout_ms: 150,
            ..DbRuntimeSettings::default()
        },
    )
    .unwrap();
    let client = AccessClient::new(
        pool.clone(),
        AccessPolicy {
            acquire_timeout: Duration::from_millis(150),
            ..AccessPolicy::default()
        },
    );

    let _held = pool.get().expect("only connection");
    let err = client
        .run_query(&QueryRequest::sql("DROP TABLE usuarios"))
        .unwrap_err();
    assert_eq!(err.kind(), ToolErrorKind::Permission);
}

#[test]
fn connections_return_to_pool_after_errors() {
    let file = seeded_file();
    let client = client(&file, 1, Duration::from_millis(300));

    for _ in 0..5 {
        assert!(client
            .run_query(&QueryRequest::sql("SELECT * FROM no_such_table"))
            .is_err());
        assert!(client.describe_table("no_such_table").is_err());
    }
    assert_eq!(client.count_rows("usuarios").unwrap(), 10);
}

#[test]
fn concurrent_reads_share_the_pool() {
    let file = seeded_file();
    let client = client(&file, 2, Duration::from_secs(2));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let client = client.clone();
            std::thread::spawn(move || client.count_rows("pedidos"))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 12);
    }
}

#[test]
fn describe_matches_pragma_query() {
    let file = seeded_file();
    let client = client(&file, 2, Duration::from_secs(1));

    let described = client.describe_table("pedidos").unwrap();
    let QueryOutput::Rows(raw) = client
        .run_query(&QueryRequest::sql("PRAGMA table_info(pedidos)"))
        .unwrap()
    else {
        panic!("expected rows");
    };
    assert_eq!(described.len(), raw.len());
}
