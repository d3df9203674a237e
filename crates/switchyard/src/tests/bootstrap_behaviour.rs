//! Bootstrap sequencing and its health events.

use mockall::mock;
use rstest::rstest;

use switchyard_config::{Config, ConfigValidationError, ListenerDirective, ListenerKind};

use crate::bootstrap::{BootstrapError, StaticConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::process::HandoffError;
use crate::transport::{TransportError, TransportInstance};

use super::support::{FailingConfigLoader, HealthEvent, RecordingHealthReporter};

#[rstest]
fn bootstrap_reports_success() {
    let reporter = RecordingHealthReporter::default();
    let loader = StaticConfigLoader::new(Config::default());

    let bootstrapped = bootstrap_with(&loader, &reporter).expect("bootstrap succeeds");

    assert_eq!(bootstrapped.config(), &Config::default());
    assert_eq!(
        reporter.events(),
        vec![HealthEvent::BootstrapStarting, HealthEvent::BootstrapSucceeded]
    );
}

#[rstest]
fn unparsable_arguments_fail_bootstrap() {
    let reporter = RecordingHealthReporter::default();

    let error = bootstrap_with(&FailingConfigLoader, &reporter).expect_err("loader fails");

    assert!(matches!(error, BootstrapError::Configuration { .. }));
    let events = reporter.events();
    assert_eq!(events.first(), Some(&HealthEvent::BootstrapStarting));
    assert!(matches!(events.last(), Some(HealthEvent::BootstrapFailed(_))));
    assert!(!events.contains(&HealthEvent::BootstrapSucceeded));
}

#[rstest]
fn inconsistent_configuration_fails_validation() {
    let reporter = RecordingHealthReporter::default();
    let loader = StaticConfigLoader::new(Config {
        listeners: vec![
            ListenerDirective::new("edge", ListenerKind::Tcp, "127.0.0.1", 7070),
            ListenerDirective::new("edge", ListenerKind::Quic, "127.0.0.1", 7443),
        ],
        ..Config::default()
    });

    let error = bootstrap_with(&loader, &reporter).expect_err("validation fails");

    match error {
        BootstrapError::Validation { source } => assert_eq!(
            source,
            ConfigValidationError::DuplicateListener {
                name: "edge".to_owned()
            }
        ),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        reporter.events().last(),
        Some(HealthEvent::BootstrapFailed(message)) if message.contains("edge")
    ));
}

mock! {
    Reporter {}
    impl HealthReporter for Reporter {
        fn bootstrap_starting(&self);
        fn bootstrap_succeeded(&self, config: &Config);
        fn bootstrap_failed(&self, error: &BootstrapError);
        fn listener_started(&self, instance: &TransportInstance);
        fn listener_failed(&self, directive: &ListenerDirective, error: &TransportError);
        fn restart_spawned(&self, pid: u32);
        fn restart_failed(&self, error: &HandoffError);
        fn drain_started(&self, in_flight: usize);
        fn drain_finished(&self, drained: bool);
    }
}

#[rstest]
fn each_bootstrap_stage_is_reported_once() {
    let mut reporter = MockReporter::new();
    reporter.expect_bootstrap_starting().times(1).return_const(());
    reporter
        .expect_bootstrap_failed()
        .withf(|error| matches!(error, BootstrapError::Validation { .. }))
        .times(1)
        .return_const(());
    reporter.expect_bootstrap_succeeded().never();

    let loader = StaticConfigLoader::new(Config {
        handoff_env_var: "  ".to_owned(),
        ..Config::default()
    });
    let error = bootstrap_with(&loader, &reporter).expect_err("blank handoff variable");
    assert!(matches!(
        error,
        BootstrapError::Validation {
            source: ConfigValidationError::EmptyHandoffVar
        }
    ));
}
