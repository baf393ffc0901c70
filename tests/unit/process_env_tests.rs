//! Tests that read the real process environment.
//!
//! These mutate process-global variables and must run serially.

use ci_connection::logging::{debug_requested, default_directive};
use ci_connection::snapshot::env::DENYLIST_ENV_VAR;
use ci_connection::snapshot::EnvSnapshot;
use ci_connection::CiEnvironment;

const DEBUG_VARS: [&str; 2] = ["WAIT_FOR_CONNECTION_DEBUG", "RUNNER_DEBUG"];

fn clear_debug_vars() {
    for name in DEBUG_VARS {
        std::env::remove_var(name);
    }
}

#[test]
fn default_directive_levels() {
    assert_eq!(default_directive(false), "info");
    assert_eq!(default_directive(true), "debug");
}

#[test]
#[serial_test::serial]
fn debug_follows_either_variable() {
    clear_debug_vars();
    assert!(!debug_requested());

    std::env::set_var("RUNNER_DEBUG", "1");
    assert!(debug_requested());
    clear_debug_vars();

    std::env::set_var("WAIT_FOR_CONNECTION_DEBUG", "");
    assert!(!debug_requested(), "empty value does not enable debug");

    std::env::set_var("WAIT_FOR_CONNECTION_DEBUG", "true");
    assert!(debug_requested());
    clear_debug_vars();
}

#[test]
#[serial_test::serial]
fn capture_reads_process_environment_and_list_variables() {
    std::env::set_var("CI_CONNECTION_TEST_KEEP", "kept");
    std::env::set_var("CI_CONNECTION_TEST_DROP", "dropped");
    std::env::set_var(DENYLIST_ENV_VAR, "CI_CONNECTION_TEST_DROP");
    std::env::set_var("GITHUB_TOKEN", "ghs_never_saved");

    let snap = EnvSnapshot::capture(&[], &[]);

    assert_eq!(snap.get("CI_CONNECTION_TEST_KEEP"), Some("kept"));
    assert_eq!(snap.get("CI_CONNECTION_TEST_DROP"), None);
    assert_eq!(snap.get("GITHUB_TOKEN"), None);

    let only = EnvSnapshot::capture(&[], &["CI_CONNECTION_TEST_KEEP".to_owned()]);
    assert_eq!(only.len(), 1);

    for name in [
        "CI_CONNECTION_TEST_KEEP",
        "CI_CONNECTION_TEST_DROP",
        DENYLIST_ENV_VAR,
        "GITHUB_TOKEN",
    ] {
        std::env::remove_var(name);
    }
}

#[test]
#[serial_test::serial]
fn ci_environment_from_process() {
    std::env::set_var("HALT_DISPATCH_INPUT", "yes");

    let env = CiEnvironment::from_process_env();
    assert_eq!(env.halt_dispatch_input.as_deref(), Some("yes"));

    std::env::remove_var("HALT_DISPATCH_INPUT");
}

#[cfg(unix)]
#[test]
#[serial_test::serial]
fn non_utf8_variable_is_skipped_everywhere() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    use ci_connection::session::client::{shell_command, ReplayContext, ShellProgram};
    use ci_connection::snapshot::env::process_vars;

    const BAD: &str = "CI_CONNECTION_TEST_BAD_BYTES";
    std::env::set_var(BAD, OsString::from_vec(vec![0x66, 0xff]));
    std::env::set_var("CI_CONNECTION_TEST_GOOD", "fine");
    std::env::set_var("HALT_DISPATCH_INPUT", "true");

    let vars = process_vars();
    assert!(vars.iter().all(|(name, _)| name != BAD));
    assert!(vars
        .iter()
        .any(|(name, value)| name == "CI_CONNECTION_TEST_GOOD" && value == "fine"));

    let snap = EnvSnapshot::capture(&[], &[]);
    assert_eq!(snap.get(BAD), None);
    assert_eq!(snap.get("CI_CONNECTION_TEST_GOOD"), Some("fine"));

    let env = CiEnvironment::from_process_env();
    assert_eq!(env.halt_dispatch_input.as_deref(), Some("true"));

    let context = ReplayContext {
        env: Some(snap),
        ..ReplayContext::default()
    };
    let command = shell_command(&ShellProgram::detect(true, None, None), &context);
    assert!(command.get_envs().all(|(name, _)| name != BAD));

    for name in [BAD, "CI_CONNECTION_TEST_GOOD", "HALT_DISPATCH_INPUT"] {
        std::env::remove_var(name);
    }
}
