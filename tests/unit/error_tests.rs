use ci_connection::AppError;

#[test]
fn display_carries_category_prefix() {
    let cases = [
        (AppError::Config("bad port".into()), "config: bad port"),
        (AppError::Io("denied".into()), "io: denied"),
        (AppError::Http("timeout".into()), "http: timeout"),
        (AppError::Protocol("refused".into()), "protocol: refused"),
        (AppError::Snapshot("truncated".into()), "snapshot: truncated"),
        (
            AppError::HaltAmbiguous("no labels".into()),
            "halt ambiguous: no labels",
        ),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn json_errors_become_snapshot_errors() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{")
        .expect_err("truncated json")
        .into();
    assert!(err.to_string().starts_with("snapshot: invalid json"));
}

#[test]
fn io_errors_keep_their_message() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err = AppError::from(io);
    assert_eq!(err.to_string(), "io: gone");
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Io("x".into()));
}
