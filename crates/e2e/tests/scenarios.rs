mod common;

use test_case::test_case;
use trackprobe_e2e::executor::StepStatus;
use trackprobe_e2e::locator::Target;
use trackprobe_e2e::mock::{Call, MockApp, MockElement, MockFrame};
use trackprobe_e2e::report::Phase;
use trackprobe_e2e::{HarnessConfig, ScenarioRunner, ScenarioVerdict};

use common::{config, nutritrack, registration, scenario, BASE_URL};

fn runner(app: &MockApp) -> ScenarioRunner {
    ScenarioRunner::new(config(), app.launcher())
}

fn teardown_calls(app: &MockApp, session: usize) -> (usize, usize, usize) {
    (
        app.count(|e| e.session == session && e.call == Call::CloseContext),
        app.count(|e| e.session == session && e.call == Call::CloseBrowser),
        app.count(|e| e.session == session && e.call == Call::Shutdown),
    )
}

/// A new user fills the registration form and sees the confirmation.
#[tokio::test]
async fn registration_success_passes() {
    let app = nutritrack();
    let result = runner(&app)
        .run_scenario(&registration("register", "alice@example.com"))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Passed, "{:?}", result.diagnostics);
    assert!(result.diagnostics.is_empty());
    assert_eq!(
        result.lifecycle,
        vec![
            Phase::NotStarted,
            Phase::SessionAcquired,
            Phase::Running,
            Phase::Passed,
            Phase::SessionReleased
        ]
    );
    assert_eq!(result.steps.len(), 4);
    assert!(app.with_backend(|b| b.get("user:alice@example.com").is_some()));
}

/// Submitting the same email twice: the first submission succeeds, only the
/// second reports the address as taken.
#[tokio::test]
async fn duplicate_email_is_rejected_on_second_submission_only() {
    let app = nutritrack();
    let duplicate = scenario(
        r#"
name: duplicate-email
steps:
  - action: navigate
    url: /register
  - action: fill
    locator: label=Email
    value: bob@example.com
  - action: click
    locator: role=button[name="Create Account"]
  - action: expect
    expectation:
      visible:
        locator: text=Registration successful
  - action: expect
    expectation:
      any_of:
        - text_contains:
            locator: text=Email is
            text: already in use
        - visible:
            locator: text=Registration successful
  - action: click
    locator: role=button[name="Create Account"]
expectations:
  - visible:
      locator: text=already in use
  - text_contains:
      locator: text=Email is
      text: ALREADY IN USE
      ignore_case: true
"#,
    );

    let result = runner(&app).run_scenario(&duplicate).await;

    assert_eq!(result.verdict, ScenarioVerdict::Passed, "{:?}", result.diagnostics);
    assert_eq!(app.count(|e| matches!(e.call, Call::Click(_))), 2);
    assert_eq!(app.with_backend(|b| b.records.len()), 1);
}

/// A second registration in a new session sees the first one's account,
/// because the backend outlives browser sessions.
#[tokio::test]
async fn duplicate_email_across_sessions_fails_expectation() {
    let app = nutritrack();
    let runner = runner(&app);

    let first = runner.run_scenario(&registration("first", "carol@example.com")).await;
    let second = runner.run_scenario(&registration("second", "carol@example.com")).await;

    assert_eq!(first.verdict, ScenarioVerdict::Passed);
    assert_eq!(second.verdict, ScenarioVerdict::Failed);
    let failure = second.first_failure().unwrap();
    assert_eq!(failure.expectation_index, Some(0));
    assert!(failure.message.contains("not found"), "{}", failure.message);
}

/// A panic inside a step still releases the session exactly once and the
/// scenario is reported as errored.
#[tokio::test]
async fn panicking_step_releases_session_once() {
    let app = nutritrack().panic_on_click(common::get_started());
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: crash
steps:
  - action: navigate
    url: /
  - action: click
    locator: xpath=html/body/div/div/header/div/div[2]/a/button
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    assert_eq!(result.first_failure().unwrap().kind, "panic");
    assert_eq!(teardown_calls(&app, 0), (1, 1, 1));
    assert_eq!(result.lifecycle.last(), Some(&Phase::SessionReleased));
}

/// A step whose locator never resolves halts the scenario; later steps do
/// not run and teardown happens once.
#[tokio::test]
async fn fatal_step_halts_and_releases_once() {
    let app = nutritrack();
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: missing-button
steps:
  - action: navigate
    url: /
  - action: click
    locator: text=Log Out
  - action: navigate
    url: /dashboard
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.step_index, Some(1));
    assert_eq!(failure.kind, "locator_not_found");
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[1].status, StepStatus::Errored);
    assert_eq!(app.count(|e| matches!(&e.call, Call::Goto(url) if url.ends_with("/dashboard"))), 0);
    assert_eq!(teardown_calls(&app, 0), (1, 1, 1));
}

/// Every scenario of a run gets its own session, released exactly once,
/// whatever its verdict.
#[tokio::test]
async fn every_session_released_exactly_once() {
    let app = nutritrack().panic_on_click(common::get_started());
    let scenarios = vec![
        registration("ok", "dave@example.com"),
        scenario("name: missing\nsteps:\n  - action: navigate\n    url: /\n  - action: click\n    locator: text=Nope\n"),
        scenario("name: crash\nsteps:\n  - action: navigate\n    url: /\n  - action: click\n    locator: xpath=html/body/div/div/header/div/div[2]/a/button\n"),
        scenario("name: unfinished\nsteps:\n  - action: navigate\n    url: /\n  - action: incomplete\n"),
    ];

    let report = runner(&app).run(&scenarios).await;

    assert_eq!(report.summary.total, 4);
    assert_eq!(app.sessions_launched(), 4);
    for session in 0..4 {
        assert_eq!(teardown_calls(&app, session), (1, 1, 1), "session {}", session);
    }
}

/// Waiting on a frame that never finishes loading is tolerated when asked
/// and does not change the verdict.
#[tokio::test]
async fn tolerant_frame_timeout_does_not_change_verdict() {
    let with_wait = r#"
name: dashboard-chart
steps:
  - action: navigate
    url: /dashboard
    wait_until: commit
  - action: wait_for
    target: frames
    state: domcontentloaded
    tolerate_failure: true
expectations:
  - text_contains:
      locator:
        text: Calories today
        frame:
          name: chart
      text: "1840"
"#;
    let without_wait = r#"
name: dashboard-chart
steps:
  - action: navigate
    url: /dashboard
    wait_until: commit
expectations:
  - text_contains:
      locator:
        text: Calories today
        frame:
          name: chart
      text: "1840"
"#;

    let tolerant = runner(&nutritrack()).run_scenario(&scenario(with_wait)).await;
    let plain = runner(&nutritrack()).run_scenario(&scenario(without_wait)).await;

    assert_eq!(tolerant.verdict, ScenarioVerdict::Passed, "{:?}", tolerant.diagnostics);
    assert_eq!(tolerant.verdict, plain.verdict);
    assert_eq!(tolerant.steps[1].status, StepStatus::Tolerated);
}

/// The same wait without tolerance is a fatal timeout.
#[tokio::test]
async fn intolerant_frame_timeout_errors() {
    let result = runner(&nutritrack())
        .run_scenario(&scenario(
            r#"
name: strict-frames
steps:
  - action: navigate
    url: /dashboard
  - action: wait_for
    target: frames
    state: load
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    assert_eq!(result.first_failure().unwrap().kind, "action_timeout");
}

/// A text mismatch or a missing element is a failed verdict, never an error.
#[test_case("text=Welcome", "Goodbye", "does not contain" ; "text mismatch")]
#[test_case("text=Sign Out", "Sign Out", "not found" ; "missing element")]
#[tokio::test]
async fn text_contains_fails_without_error(locator: &str, text: &str, diagnostic: &str) {
    let app = nutritrack();
    let result = runner(&app)
        .run_scenario(&scenario(&format!(
            "name: text-check\nsteps:\n  - action: navigate\n    url: /dashboard\nexpectations:\n  - text_contains:\n      locator: {}\n      text: {}\n",
            locator, text
        )))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Failed);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.kind, "expectation_failed");
    assert!(failure.message.contains(diagnostic), "{}", failure.message);
}

/// Login ends on either the dashboard or an error banner; both satisfy the
/// alternative expectation.
#[test_case("erin@example.com", "test123" ; "valid credentials")]
#[test_case("erin@example.com", "wrong" ; "invalid credentials")]
#[tokio::test]
async fn any_of_accepts_either_end_state(email: &str, password: &str) {
    let app = nutritrack();
    app.with_backend(|b| b.insert_new("user:erin@example.com", "test123"));

    let login = scenario(&format!(
        r#"
name: login
steps:
  - action: navigate
    url: /login
  - action: fill
    locator: label=Email
    value: {email}
  - action: fill
    locator: label=Password
    value: {password}
  - action: click
    locator: role=button[name="Sign In"]
expectations:
  - any_of:
      - visible:
          locator: text=Welcome back
      - visible:
          locator: text=Invalid credentials
"#
    ));

    let result = runner(&app).run_scenario(&login).await;
    assert_eq!(result.verdict, ScenarioVerdict::Passed, "{:?}", result.diagnostics);
}

/// When no alternative holds the diagnostic names each of them.
#[tokio::test]
async fn any_of_lists_every_failed_alternative() {
    let result = runner(&nutritrack())
        .run_scenario(&scenario(
            r#"
name: nowhere
steps:
  - action: navigate
    url: /
expectations:
  - any_of:
      - visible:
          locator: text=Welcome back
      - visible:
          locator: text=Invalid credentials
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Failed);
    let message = &result.first_failure().unwrap().message;
    assert!(message.contains("text=Welcome back not found"), "{}", message);
    assert!(message.contains("text=Invalid credentials not found"), "{}", message);
}

/// A scenario's verdict does not depend on what ran before it.
#[tokio::test]
async fn verdicts_are_independent_of_order() {
    let landing = scenario(
        r#"
name: landing
steps:
  - action: navigate
    url: /
  - action: scroll
    delta_y: 720
expectations:
  - visible:
      locator: text=NutriTrackAI - Smart Calorie Tracker
"#,
    );
    let register = registration("register", "frank@example.com");

    let after = runner(&nutritrack()).run(&[register, landing.clone()]).await;
    let alone = runner(&nutritrack()).run(&[landing]).await;

    assert_eq!(after.result("landing").unwrap().verdict, alone.result("landing").unwrap().verdict);
    assert_eq!(alone.result("landing").unwrap().verdict, ScenarioVerdict::Passed);
}

/// Concurrent runs keep results in input order.
#[tokio::test]
async fn concurrent_jobs_keep_input_order() {
    let app = nutritrack();
    let config = HarnessConfig { jobs: 3, ..config() };
    let runner = ScenarioRunner::new(config, app.launcher());
    let scenarios: Vec<_> = (0..5)
        .map(|i| registration(&format!("user-{}", i), &format!("user{}@example.com", i)))
        .collect();

    let report = runner.run(&scenarios).await;

    let names: Vec<_> = report.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["user-0", "user-1", "user-2", "user-3", "user-4"]);
    assert!(report.all_passed());
}

/// A placeholder where a real check belongs is reported as incomplete.
#[tokio::test]
async fn incomplete_scenario_is_not_a_pass() {
    let report = runner(&nutritrack())
        .run(&[scenario(
            r#"
name: session-timeout
steps:
  - action: navigate
    url: /dashboard
  - action: incomplete
    reason: session expiry cannot be observed within the run
  - action: click
    locator: role=button[name="Log Out"]
"#,
        )])
        .await;

    let result = &report.results[0];
    assert_eq!(result.verdict, ScenarioVerdict::Incomplete);
    assert_eq!(result.first_failure().unwrap().step_index, Some(1));
    assert_eq!(result.steps.len(), 2);
    assert!(!report.all_passed());
    assert_eq!(report.summary.incomplete, 1);
}

/// A browser that fails to launch errors the scenario before any step.
#[tokio::test]
async fn launch_failure_errors_without_steps() {
    let app = nutritrack().fail_launch();
    let result = runner(&app).run_scenario(&registration("register", "gina@example.com")).await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    assert!(result.steps.is_empty());
    assert_eq!(result.first_failure().unwrap().kind, "launch_failure");
    assert_eq!(result.lifecycle, vec![Phase::NotStarted, Phase::Errored, Phase::SessionReleased]);
    assert_eq!(app.count(|e| e.call == Call::Launch || e.call == Call::CloseContext), 0);
}

/// A page that cannot be opened after launch still tears the browser down.
#[tokio::test]
async fn failed_page_open_releases_browser() {
    let app = nutritrack().fail_open_page();
    let result = runner(&app).run_scenario(&registration("register", "hal@example.com")).await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    assert!(result.steps.is_empty());
    assert_eq!(result.first_failure().unwrap().kind, "launch_failure");
    assert_eq!(
        result.lifecycle,
        vec![Phase::NotStarted, Phase::SessionAcquired, Phase::Errored, Phase::SessionReleased]
    );
    assert_eq!(teardown_calls(&app, 0), (1, 1, 1));
}

/// A failing teardown is reported but does not overturn the verdict.
#[tokio::test]
async fn teardown_failure_keeps_verdict() {
    let app = nutritrack().fail_close_browser();
    let result = runner(&app).run_scenario(&registration("register", "ivy@example.com")).await;

    assert_eq!(result.verdict, ScenarioVerdict::Passed);
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].kind, "teardown");
    assert_eq!(teardown_calls(&app, 0), (1, 1, 1));
}

/// A click the driver never completes is an action timeout.
#[tokio::test]
async fn hung_click_is_action_timeout() {
    let app = nutritrack().hang_on_click(common::sign_in());
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: hung-login
steps:
  - action: navigate
    url: /login
  - action: click
    locator: role=button[name="Sign In"]
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.kind, "action_timeout");
    assert!(failure.message.contains("click"), "{}", failure.message);

    // The driver was called and never answered; the step still ended near
    // its bound plus the driver grace.
    assert_eq!(app.count(|e| e.call == Call::Click(common::sign_in())), 1);
    assert!(result.steps[1].duration_ms < 1_000, "{} ms", result.steps[1].duration_ms);
    assert_eq!(teardown_calls(&app, 0), (1, 1, 1));
}

/// A frame that detaches during a tolerant wait is tolerated like a timeout,
/// and a locator addressing it still resolves against what is rendered.
#[tokio::test]
async fn detached_frame_during_tolerant_wait_is_tolerated() {
    let app = nutritrack().route("/widgets", |_| {
        vec![
            MockFrame::main(vec![MockElement::new(Target::role("button", "Log Out")).with_text("Log Out")]),
            MockFrame::child("ads", format!("{}/embed/ads", BASE_URL), vec![MockElement::text("Sponsored")]).detaching(),
        ]
    });
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: widgets
steps:
  - action: navigate
    url: /widgets
  - action: wait_for
    target: frames
    state: domcontentloaded
    tolerate_failure: true
  - action: click
    locator: role=button[name="Log Out"]
expectations:
  - visible:
      locator:
        text: Sponsored
        frame:
          name: ads
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Passed, "{:?}", result.diagnostics);
    assert_eq!(result.steps.len(), 3);
    assert_eq!(result.steps[1].status, StepStatus::Tolerated);
    assert_eq!(result.steps[2].status, StepStatus::Ok);
}

/// A detached frame still errors a wait that does not tolerate failure.
#[tokio::test]
async fn detached_frame_during_strict_wait_errors() {
    let app = nutritrack().route("/widgets", |_| {
        vec![
            MockFrame::main(Vec::new()),
            MockFrame::child("ads", format!("{}/embed/ads", BASE_URL), Vec::new()).detaching(),
        ]
    });
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: widgets-strict
steps:
  - action: navigate
    url: /widgets
  - action: wait_for
    target: frames
    state: domcontentloaded
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    assert_eq!(result.first_failure().unwrap().kind, "driver");
}

/// When resolving the locator used up the step's bound, the action is a
/// timeout and the driver is never asked to act.
#[tokio::test]
async fn click_after_resolution_spent_bound_is_action_timeout() {
    let app = nutritrack();
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: chart-click
steps:
  - action: navigate
    url: /dashboard
  - action: click
    locator:
      text: Calories today
      frame:
        name: chart
    timeout_ms: 50
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.kind, "action_timeout");
    assert_eq!(failure.step_index, Some(1));
    assert_eq!(app.count(|e| matches!(e.call, Call::Click(_))), 0);
}

/// Frames share one wait bound: several stalled frames cost the step's
/// timeout once, not once per frame.
#[tokio::test]
async fn stalled_frames_share_the_step_bound() {
    let app = nutritrack().route("/feeds", |_| {
        vec![
            MockFrame::main(Vec::new()),
            MockFrame::child("news", format!("{}/embed/news", BASE_URL), Vec::new()).stalled(),
            MockFrame::child("weather", format!("{}/embed/weather", BASE_URL), Vec::new()).stalled(),
            MockFrame::child("stocks", format!("{}/embed/stocks", BASE_URL), Vec::new()).stalled(),
        ]
    });
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: feeds
steps:
  - action: navigate
    url: /feeds
  - action: wait_for
    target: frames
    state: load
    timeout_ms: 100
    tolerate_failure: true
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Passed, "{:?}", result.diagnostics);
    let wait = &result.steps[1];
    assert_eq!(wait.status, StepStatus::Tolerated);
    assert!(wait.duration_ms >= 90, "{} ms", wait.duration_ms);
    assert!(wait.duration_ms < 200, "{} ms", wait.duration_ms);
}

/// A failing interleaved expectation halts the scenario at that step.
#[tokio::test]
async fn failing_interleaved_expect_halts_scenario() {
    let app = nutritrack();
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: premature-banner
steps:
  - action: navigate
    url: /register
  - action: expect
    expectation:
      visible:
        locator: text=Registration successful
    timeout_ms: 50
  - action: click
    locator: role=button[name="Create Account"]
expectations:
  - visible:
      locator: text=Registration successful
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Failed);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.kind, "expectation_failed");
    assert_eq!(failure.step_index, Some(1));
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[1].status, StepStatus::Failed);
    assert_eq!(app.count(|e| matches!(e.call, Call::Click(_))), 0);
}

/// A driver fault while evaluating an expectation errors the scenario.
#[tokio::test]
async fn expectation_fault_errors_scenario() {
    let app = nutritrack().disconnect_on_read();
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: coach-send
steps:
  - action: navigate
    url: /coach
expectations:
  - enabled:
      locator: role=button[name="Send"]
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.kind, "driver");
    assert_eq!(failure.expectation_index, Some(0));
    assert_eq!(teardown_calls(&app, 0), (1, 1, 1));
}

/// The fault that decided an errored verdict is reported ahead of earlier
/// ordinary mismatches.
#[tokio::test]
async fn fault_diagnostic_precedes_mismatch() {
    let app = nutritrack().disconnect_on_read();
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: coach-mixed
steps:
  - action: navigate
    url: /coach
expectations:
  - visible:
      locator: text=Welcome back
  - enabled:
      locator: role=button[name="Send"]
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Errored);
    assert_eq!(result.diagnostics.len(), 2);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.kind, "driver");
    assert_eq!(failure.expectation_index, Some(1));
    assert_eq!(result.diagnostics[1].kind, "expectation_failed");
    assert_eq!(result.diagnostics[1].expectation_index, Some(0));
}

/// Steps follow a popup once the driver reports it.
#[tokio::test]
async fn popup_becomes_current_page() {
    let result = runner(&nutritrack())
        .run_scenario(&scenario(
            r#"
name: connect-fit
steps:
  - action: navigate
    url: /dashboard
  - action: click
    locator: role=button[name="Connect Google Fit"]
expectations:
  - visible:
      locator: text=Authorize NutriTrackAI
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Passed, "{:?}", result.diagnostics);
}

/// A disabled control fails the enabled expectation.
#[tokio::test]
async fn disabled_send_button_fails_enabled_check() {
    let result = runner(&nutritrack())
        .run_scenario(&scenario(
            r#"
name: coach-empty-message
steps:
  - action: navigate
    url: /coach
  - action: set_viewport
    width: 375
    height: 667
expectations:
  - visible:
      locator: css=input[placeholder="Type your message..."]
  - enabled:
      locator: role=button[name="Send"]
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Failed);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.expectation_index, Some(1));
    assert!(failure.message.contains("disabled"), "{}", failure.message);
}

/// Element waits poll until the element appears.
#[tokio::test]
async fn wait_for_element_state() {
    let app = nutritrack();
    let result = runner(&app)
        .run_scenario(&scenario(
            r#"
name: wait-banner
steps:
  - action: navigate
    url: /register
  - action: fill
    locator: label=Email
    value: jay@example.com
  - action: click
    locator: role=button[name="Create Account"]
  - action: wait_for
    target:
      element: text=Registration successful
    state: visible
  - action: wait_for
    target:
      element: text=already in use
    state: detached
"#,
        ))
        .await;

    assert_eq!(result.verdict, ScenarioVerdict::Passed, "{:?}", result.diagnostics);
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Ok));
}
