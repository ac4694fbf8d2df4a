//! A small in-memory NutriTrackAI used by the integration tests

#![allow(dead_code)]

use trackprobe_e2e::config::{HarnessConfig, Timeouts};
use trackprobe_e2e::locator::Target;
use trackprobe_e2e::mock::{MockApp, MockElement, MockFrame};
use trackprobe_e2e::Scenario;

pub const BASE_URL: &str = "http://localhost:5173";

pub fn email_field() -> Target {
    Target::Label("Email".into())
}

pub fn password_field() -> Target {
    Target::Label("Password".into())
}

pub fn create_account() -> Target {
    Target::role("button", "Create Account")
}

pub fn sign_in() -> Target {
    Target::role("button", "Sign In")
}

pub fn get_started() -> Target {
    Target::xpath("html/body/div/div/header/div/div[2]/a/button")
}

pub fn connect_fit() -> Target {
    Target::role("button", "Connect Google Fit")
}

/// Landing, registration, login, dashboard and coach pages. The dashboard
/// embeds a chart frame whose load never completes.
pub fn nutritrack() -> MockApp {
    MockApp::new()
        .route("/", |_| {
            vec![MockFrame::main(vec![
                MockElement::text("NutriTrackAI - Smart Calorie Tracker"),
                MockElement::new(get_started()).with_text("Get Started"),
            ])]
        })
        .route("/register", |_| {
            vec![MockFrame::main(vec![
                MockElement::new(Target::Label("Username".into())),
                MockElement::new(email_field()),
                MockElement::new(password_field()),
                MockElement::new(create_account()).with_text("Create Account"),
            ])]
        })
        .route("/login", |_| {
            vec![MockFrame::main(vec![
                MockElement::new(email_field()),
                MockElement::new(password_field()),
                MockElement::new(sign_in()).with_text("Sign In"),
            ])]
        })
        .route("/dashboard", |_| {
            vec![
                MockFrame::main(vec![
                    MockElement::text("Welcome back"),
                    MockElement::new(Target::role("button", "Log Out")).with_text("Log Out"),
                    MockElement::new(connect_fit()).with_text("Connect Google Fit"),
                ]),
                MockFrame::child(
                    "chart",
                    format!("{}/embed/chart", BASE_URL),
                    vec![MockElement::text("Calories today: 1840")],
                )
                .stalled(),
            ]
        })
        .route("/coach", |_| {
            vec![MockFrame::main(vec![
                MockElement::new(Target::Css("input[placeholder=\"Type your message...\"]".into())),
                MockElement::new(Target::role("button", "Send")).with_text("Send").disabled(),
            ])]
        })
        .route("/oauth", |_| vec![MockFrame::main(vec![MockElement::text("Authorize NutriTrackAI")])])
        .on_click(get_started(), |ctx| ctx.navigate("/register"))
        .on_click(create_account(), |ctx| {
            let email = ctx.value_of(&email_field());
            let password = ctx.value_of(&password_field());
            ctx.remove(&Target::text("Registration successful"));
            ctx.remove(&Target::text("already in use"));

            if email.is_empty() {
                ctx.show(MockElement::text("Email is required"));
            } else if ctx.backend.insert_new(format!("user:{}", email), password) {
                ctx.show(MockElement::text("Registration successful!"));
            } else {
                ctx.show(MockElement::text("Email is already in use"));
            }
        })
        .on_click(sign_in(), |ctx| {
            let email = ctx.value_of(&email_field());
            let password = ctx.value_of(&password_field());
            let known = ctx.backend.get(&format!("user:{}", email)) == Some(password.as_str());
            if known {
                ctx.navigate("/dashboard");
            } else {
                ctx.show(MockElement::text("Invalid credentials"));
            }
        })
        .on_click(connect_fit(), |ctx| ctx.open_popup("/oauth"))
}

/// Fast bounds so failing waits finish quickly
pub fn config() -> HarnessConfig {
    HarnessConfig {
        base_url: BASE_URL.to_string(),
        timeouts: Timeouts {
            action_ms: 200,
            navigation_ms: 200,
            frame_ready_ms: 50,
            expectation_ms: 200,
            settle_ms: 0,
            poll_interval_ms: 10,
            driver_grace_ms: 100,
            launch_ms: 1_000,
        },
        ..Default::default()
    }
}

pub fn scenario(yaml: &str) -> Scenario {
    Scenario::from_yaml(yaml).expect("test scenario parses")
}

/// Register `email` through the UI
pub fn registration(name: &str, email: &str) -> Scenario {
    scenario(&format!(
        r#"
name: {name}
steps:
  - action: navigate
    url: /register
  - action: fill
    locator: label=Email
    value: {email}
  - action: fill
    locator: label=Password
    value: test123
  - action: click
    locator: role=button[name="Create Account"]
expectations:
  - text_contains:
      locator: text=Registration
      text: Registration successful
"#
    ))
}
