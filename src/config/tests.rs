use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_catalog_conventions() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert!(!settings.server.expose_error_detail);
    assert_eq!(
        settings.cache.backend,
        CacheBackend::Redis {
            url: DEFAULT_REDIS_URL.to_string()
        }
    );
    assert_eq!(settings.cache.stats_ttl, Duration::from_secs(3_600));
    assert_eq!(settings.cache.rebuild_batch_size.get(), 1_000);
    assert_eq!(settings.catalog.primary_facet_slug, "brend");
    assert_eq!(
        settings.catalog.excluded_slugs,
        vec!["angl-yske-naymenuvannya", "english_name"]
    );
    assert_eq!(settings.catalog.default_page_size.get(), 10);
}

#[test]
fn store_overrides_select_memory_backend() {
    let mut raw = RawSettings::default();
    raw.apply_store_overrides(&StoreOverrides {
        database_url: Some("postgres://override".to_string()),
        cache_backend: Some("Memory".to_string()),
        redis_url: None,
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.backend, CacheBackend::Memory);
    assert_eq!(
        settings.database.url.as_deref(),
        Some("postgres://override")
    );
}

#[test]
fn unknown_cache_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("memcached".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid backend");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.backend",
            ..
        }
    ));
}

#[test]
fn redis_url_scheme_is_validated() {
    let mut raw = RawSettings::default();
    raw.cache.redis_url = Some("http://localhost:6379".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid scheme");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.redis_url",
            ..
        }
    ));
}

#[test]
fn primary_facet_cannot_be_excluded() {
    let mut raw = RawSettings::default();
    raw.catalog.excluded_slugs = Some(vec!["brend".to_string()]);

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn zero_durations_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.operation_timeout_ms = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero timeout");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.operation_timeout_ms",
            ..
        }
    ));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["catalog"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_import_arguments() {
    let args = CliArgs::parse_from([
        "catalog",
        "import",
        "--database-url",
        "postgres://example",
        "--skip-rebuild",
        "/tmp/offers.json",
    ]);

    match args.command.expect("import command") {
        Command::Import(import) => {
            assert_eq!(
                import.stores.database_url.as_deref(),
                Some("postgres://example")
            );
            assert!(import.skip_rebuild);
            assert_eq!(import.file, std::path::Path::new("/tmp/offers.json"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "catalog",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--cache-backend",
        "disabled",
        "--rebuild-on-start",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.stores.cache_backend.as_deref(),
                Some("disabled")
            );
            assert!(serve.overrides.rebuild_on_start);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_rebuild_command() {
    let args = CliArgs::parse_from(["catalog", "rebuild", "--redis-url", "redis://cache:6379"]);

    match args.command.expect("rebuild command") {
        Command::Rebuild(rebuild) => {
            assert_eq!(
                rebuild.stores.redis_url.as_deref(),
                Some("redis://cache:6379")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}
