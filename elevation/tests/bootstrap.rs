#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Elevation bootstrap behavior against a fake environment.
//!
//! The environment fakes the external collaborators (service manager,
//! elevation prompt, direct execution, the caller's security context);
//! channel connections are real sessions against the simulated broker.

use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use opsvc_client::Session;
use opsvc_elevation::BrokerEnvironment;
use opsvc_elevation::ElevationBootstrap;
use opsvc_elevation::ElevationError;
use opsvc_protocol::channel;
use opsvc_protocol::ops::RequestPayload;
use opsvc_protocol::run_as::LogonType;
use opsvc_protocol::run_as::RunAsParameters;
use opsvc_protocol::run_as::Secret;
use opsvc_test_support::TestBroker;
use opsvc_test_support::init_test_logging;
use pretty_assertions::assert_eq;
use serial_test::serial;

const CALLER_SESSION: u32 = 1;

#[derive(Default)]
struct FakeEnv {
    elevated: bool,
    /// Whether provisioning actually brings a broker up.
    broker_starts: bool,
    decline_prompt: bool,
    connect_attempts: AtomicUsize,
    prompts: AtomicUsize,
    provisioned: Mutex<Vec<String>>,
    direct_executions: Mutex<Vec<String>>,
    brokers: Mutex<Vec<TestBroker>>,
}

impl FakeEnv {
    fn spawn_broker(&self, name: &str) {
        let broker = TestBroker::spawn_named(name, Box::new(|_, _| {
            opsvc_test_support::BrokerResponse::success()
        }))
        .unwrap();
        self.brokers.lock().unwrap().push(broker);
    }

    fn recorded_requests(&self) -> Vec<RequestPayload> {
        self.brokers
            .lock()
            .unwrap()
            .iter()
            .flat_map(|broker| broker.calls().into_iter().map(|call| call.request))
            .collect()
    }
}

impl BrokerEnvironment for FakeEnv {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn current_session_id(&self) -> u32 {
        CALLER_SESSION
    }

    fn provision_broker(&self, service_name: &str) -> opsvc_elevation::Result<()> {
        self.provisioned.lock().unwrap().push(service_name.to_string());
        if self.broker_starts {
            self.spawn_broker(service_name);
        }
        Ok(())
    }

    fn prompt_elevation(&self) -> opsvc_elevation::Result<String> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.decline_prompt {
            return Err(ElevationError::Cancelled);
        }
        let helper = channel::generate_name();
        self.spawn_broker(&helper);
        Ok(helper)
    }

    fn execute_direct(&self, parameters: &RunAsParameters) -> opsvc_elevation::Result<()> {
        self.direct_executions
            .lock()
            .unwrap()
            .push(parameters.command_line.clone());
        Ok(())
    }

    fn connect(&self, channel_name: &str) -> opsvc_client::Result<Session> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        Session::connect(channel_name, opsvc_client::ConnectOptions::default())
    }
}

fn interactive_request() -> RunAsParameters {
    let mut params = RunAsParameters::new("notepad.exe", LogonType::Interactive, CALLER_SESSION);
    params.user_name = Some("DOMAIN\\bob".to_string());
    params.password = Some(Secret::new("secret".to_string()));
    params
}

#[test]
#[serial]
fn direct_eligible_requests_never_touch_the_channel() {
    init_test_logging();
    let bootstrap = ElevationBootstrap::new(FakeEnv::default());

    let mut params = interactive_request();
    bootstrap.run(&mut params).unwrap();

    let env = bootstrap.environment();
    assert_eq!(
        env.direct_executions.lock().unwrap().as_slice(),
        ["notepad.exe".to_string()]
    );
    assert_eq!(env.connect_attempts.load(Ordering::SeqCst), 0);
    assert_eq!(env.prompts.load(Ordering::SeqCst), 0);
    assert!(env.provisioned.lock().unwrap().is_empty());
    // Credentials are gone before control returns to the caller.
    assert!(params.password.is_none());
}

#[test]
#[serial]
fn linked_token_and_donor_token_requests_are_not_direct_eligible() {
    init_test_logging();

    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: true,
        broker_starts: true,
        ..Default::default()
    });
    let mut params = interactive_request();
    params.use_linked_token = true;
    bootstrap.run(&mut params).unwrap();
    assert!(bootstrap.environment().direct_executions.lock().unwrap().is_empty());

    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: true,
        broker_starts: true,
        ..Default::default()
    });
    let mut params = interactive_request();
    params.process_id = Some(4321);
    bootstrap.run(&mut params).unwrap();
    assert!(bootstrap.environment().direct_executions.lock().unwrap().is_empty());
}

#[test]
#[serial]
fn foreign_session_requests_provision_and_send_execute_run_as() {
    init_test_logging();
    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: false,
        broker_starts: true,
        ..Default::default()
    });

    let mut params = interactive_request();
    params.session_id = CALLER_SESSION + 1;
    bootstrap.run(&mut params).unwrap();

    let env = bootstrap.environment();
    assert_eq!(env.prompts.load(Ordering::SeqCst), 1);
    assert!(env.direct_executions.lock().unwrap().is_empty());

    // The generated transient service name rides in the request.
    let service_name = params.service_name.clone().unwrap();
    assert!(channel::is_valid_name(&service_name), "{service_name}");

    let requests = env.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert!(
        matches!(requests[0], RequestPayload::ExecuteRunAsCommand(_)),
        "{:?}",
        requests[0]
    );
    assert!(params.password.is_none());
}

#[test]
#[serial]
fn elevated_callers_provision_and_invoke_the_service_directly() {
    init_test_logging();
    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: true,
        broker_starts: true,
        ..Default::default()
    });

    let mut params = interactive_request();
    params.session_id = CALLER_SESSION + 1;
    bootstrap.run(&mut params).unwrap();

    let env = bootstrap.environment();
    let provisioned = env.provisioned.lock().unwrap().clone();
    assert_eq!(provisioned.len(), 1);
    assert!(channel::is_valid_name(&provisioned[0]));
    assert_eq!(env.prompts.load(Ordering::SeqCst), 0);

    let requests = env.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert!(matches!(requests[0], RequestPayload::InvokeRunAsService(_)));
}

#[test]
#[serial]
fn unreachable_broker_fails_after_exactly_ten_attempts() {
    init_test_logging();
    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: true,
        broker_starts: false,
        ..Default::default()
    });

    let mut params = interactive_request();
    params.session_id = CALLER_SESSION + 1;
    let err = bootstrap.run(&mut params).unwrap_err();

    assert!(matches!(err, ElevationError::Timeout));
    let env = bootstrap.environment();
    assert_eq!(
        env.connect_attempts.load(Ordering::SeqCst),
        opsvc_elevation::CONNECT_ATTEMPTS as usize
    );
    assert!(params.password.is_none());
}

#[test]
#[serial]
fn declined_prompts_cancel_without_retries_or_connects() {
    init_test_logging();
    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: false,
        decline_prompt: true,
        ..Default::default()
    });

    let mut params = interactive_request();
    params.session_id = CALLER_SESSION + 1;
    let err = bootstrap.run(&mut params).unwrap_err();

    assert!(matches!(err, ElevationError::Cancelled));
    let env = bootstrap.environment();
    assert_eq!(env.prompts.load(Ordering::SeqCst), 1);
    assert_eq!(env.connect_attempts.load(Ordering::SeqCst), 0);
    assert!(params.password.is_none());
}

#[test]
#[serial]
fn a_live_broker_is_reused_instead_of_reprovisioned() {
    init_test_logging();
    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: true,
        broker_starts: true,
        ..Default::default()
    });

    let mut first = interactive_request();
    first.session_id = CALLER_SESSION + 1;
    bootstrap.run(&mut first).unwrap();

    let mut second = interactive_request();
    second.session_id = CALLER_SESSION + 1;
    bootstrap.run(&mut second).unwrap();

    let env = bootstrap.environment();
    // One provisioning served both requests.
    assert_eq!(env.provisioned.lock().unwrap().len(), 1);

    let requests = env.recorded_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|request| matches!(request, RequestPayload::InvokeRunAsService(_))));
}

#[test]
#[serial]
fn a_dead_cached_broker_falls_through_to_reprovisioning() {
    init_test_logging();
    let bootstrap = ElevationBootstrap::new(FakeEnv {
        elevated: true,
        broker_starts: true,
        ..Default::default()
    });

    let mut first = interactive_request();
    first.session_id = CALLER_SESSION + 1;
    bootstrap.run(&mut first).unwrap();

    // The cached broker dies between requests.
    bootstrap.environment().brokers.lock().unwrap().clear();

    let mut second = interactive_request();
    second.session_id = CALLER_SESSION + 1;
    bootstrap.run(&mut second).unwrap();

    let env = bootstrap.environment();
    let provisioned = env.provisioned.lock().unwrap().clone();
    assert_eq!(provisioned.len(), 2);
    assert_ne!(provisioned[0], provisioned[1]);
}
