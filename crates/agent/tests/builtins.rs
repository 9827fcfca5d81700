use keystone_agent::{AgentRuntime, NOTHING_PENDING};
use keystone_core::{Config, PipelineStatus};

fn runtime() -> AgentRuntime {
    AgentRuntime::new(Config::default())
}

#[tokio::test]
async fn lights_off_runs_through_builtin_modules() {
    let rt = runtime();
    let pipeline = rt.router().pipeline("home");

    let result = pipeline.submit("turn off the lights").await;

    assert_eq!(result.status, PipelineStatus::Completed, "{}", result.text);
    assert!(result.is_success());
    assert!(result.text.contains("Device.Control [ok] lights turned off"), "{}", result.text);
}

#[tokio::test]
async fn shared_scope_asks_for_confirmation() {
    let rt = runtime();
    let router = rt.router();

    let reply = router.handle("home", "turn off all the lights").await;
    assert!(reply.starts_with("Confirmation required:"), "{}", reply);
    assert!(rt.router().pipeline("home").pending().is_some());

    let reply = router.handle("home", "yes").await;
    assert!(reply.contains("1 succeeded, 0 failed"), "{}", reply);

    let reply = router.handle("home", "yes").await;
    assert_eq!(reply, NOTHING_PENDING);
}

#[tokio::test]
async fn destructive_request_is_blocked() {
    let rt = runtime();
    let pipeline = rt.router().pipeline("ops");

    let result = pipeline.submit("shut down the shared server").await;
    assert_eq!(result.status, PipelineStatus::Blocked);
    assert!(result.text.starts_with("violates 'harm none'"), "{}", result.text);

    let result = pipeline.resolve(true).await;
    assert_eq!(result.text, NOTHING_PENDING);
}

#[tokio::test]
async fn sessions_do_not_share_pending_actions() {
    let rt = runtime();
    let router = rt.router();

    let reply = router.handle("a", "reboot the build server").await;
    assert!(reply.starts_with("Confirmation required:"), "{}", reply);

    assert_eq!(router.handle("b", "no").await, NOTHING_PENDING);
    let reply = router.handle("a", "no").await;
    assert_eq!(reply, "Action cancelled: reboot the build server");
    assert_eq!(router.sessions(), vec!["a", "b"]);
}

#[tokio::test]
async fn side_channels_route_to_recall_and_consent() {
    let rt = runtime();
    let router = rt.router();

    assert_eq!(router.handle("s", "remember favorite color is blue").await, "Remembered favoritecolor = blue");
    assert_eq!(router.handle("s", "recall favorite color").await, "blue");
    assert_eq!(router.handle("s", "recall shoe size").await, "No value found for key: shoesize");

    assert_eq!(
        router.handle("s", "consent grant System.Admin").await,
        "Granted consent for System.Admin"
    );
    assert!(router.handle("s", "consent list").await.contains("System.Admin"));

    router.handle("s", "open notepad").await;
    let last = router.handle("s", "recall last outcome").await;
    assert!(last.contains("Opened notepad"), "{}", last);

    let status = router.handle("s", "status").await;
    assert!(status.starts_with("Pending: none"));
    assert!(status.contains("Interpreter"));
}

#[tokio::test]
async fn huge_confirmation_ttl_does_not_panic() {
    for secs in [u64::MAX, 10_000_000_000_000] {
        let mut config = Config::default();
        config.agent.confirm_ttl_secs = secs;
        let rt = AgentRuntime::new(config);
        let pipeline = rt.router().pipeline("home");

        let result = pipeline.submit("turn off all the lights").await;
        assert_eq!(result.status, PipelineStatus::AwaitingConfirmation, "{}", result.text);
        assert!(pipeline.pending().is_some());

        let result = pipeline.resolve(true).await;
        assert_eq!(result.status, PipelineStatus::Completed, "{}", result.text);
    }
}
