use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.default_absolute_minutes = Some(15);

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        cache_default_absolute_minutes: Some(5),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.default_absolute_minutes, 5);
}

#[test]
fn cache_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.default_absolute_minutes, 60);
    assert_eq!(settings.cache.default_sliding_minutes, 20);
    assert_eq!(settings.cache.sweep_interval_minutes.get(), 30);
    assert_eq!(settings.cache.max_body_bytes.get(), 1024 * 1024);
    assert_eq!(settings.cache.memory_max_entries.get(), 10_000);
    assert!(settings.cache.track_metadata);
    assert_eq!(settings.redis.url, None);
    assert_eq!(settings.redis.instance_prefix, "aside:");
    assert_eq!(settings.database.url, None);
}

#[test]
fn zero_expiration_defaults_are_allowed() {
    let mut raw = RawSettings::default();
    raw.cache.default_absolute_minutes = Some(0);
    raw.cache.default_sliding_minutes = Some(0);

    let settings = Settings::from_raw(raw).expect("zero disables defaults");
    assert_eq!(settings.cache.default_absolute_minutes, 0);
    assert_eq!(settings.cache.default_sliding_minutes, 0);
}

#[test]
fn zero_sweep_interval_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.sweep_interval_minutes = Some(0);

    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "cache.sweep_interval_minutes"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn lifetimes_beyond_a_year_are_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.default_absolute_minutes = Some(u32::MAX);

    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "cache.default_absolute_minutes"),
        other => panic!("unexpected result: {other:?}"),
    }

    let mut raw = RawSettings::default();
    raw.cache.default_sliding_minutes = Some(MAX_CACHE_LIFETIME_MINUTES + 1);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.default_sliding_minutes",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.cache.default_absolute_minutes = Some(MAX_CACHE_LIFETIME_MINUTES);
    let settings = Settings::from_raw(raw).expect("a year is allowed");
    assert_eq!(
        settings.cache.default_absolute_minutes,
        MAX_CACHE_LIFETIME_MINUTES
    );
}

#[test]
fn zero_memory_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.memory_max_entries = Some(0);

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.memory_max_entries",
            ..
        })
    ));
}

#[test]
fn blank_urls_are_treated_as_absent() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    raw.redis.url = Some(String::new());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.database.url, None);
    assert_eq!(settings.redis.url, None);
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
fn invalid_log_level_is_reported() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn parse_sweep_command() {
    let args = CliArgs::parse_from(["aside", "sweep", "--database-url", "postgres://example"]);

    match args.command.expect("sweep command") {
        Command::Sweep(sweep) => {
            assert_eq!(
                sweep.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "aside",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--redis-url",
        "redis://cache:6379",
        "--cache-track-metadata",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.redis_url.as_deref(),
                Some("redis://cache:6379")
            );
            assert_eq!(serve.overrides.cache_track_metadata, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn defaults_to_serve_without_subcommand() {
    let args = CliArgs::parse_from(["aside"]);
    assert!(args.command.is_none());
}

#[test]
#[serial_test::serial]
fn environment_overrides_config_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(
        &mut file,
        b"[cache]\ndefault_absolute_minutes = 9\ndefault_sliding_minutes = 3\n",
    )
    .expect("write config");

    // SAFETY: serialised with every other test that touches the environment.
    unsafe { std::env::set_var("ASIDE__CACHE__DEFAULT_ABSOLUTE_MINUTES", "7") };
    let args = CliArgs {
        config_file: Some(file.path().to_path_buf()),
        command: None,
    };
    let result = load(&args);
    unsafe { std::env::remove_var("ASIDE__CACHE__DEFAULT_ABSOLUTE_MINUTES") };

    let settings = result.expect("layered settings");
    assert_eq!(settings.cache.default_absolute_minutes, 7);
    assert_eq!(settings.cache.default_sliding_minutes, 3);
}

#[test]
#[serial_test::serial]
fn missing_explicit_config_file_is_an_error() {
    let args = CliArgs {
        config_file: Some(std::path::PathBuf::from("/nonexistent/aside.toml")),
        command: None,
    };
    assert!(load(&args).is_err());
}
