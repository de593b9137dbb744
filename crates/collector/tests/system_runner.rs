#![forbid(unsafe_code)]

#[cfg(target_os = "linux")]
mod linux {
    use collector::error::Error;
    use collector::exec::{CommandRunner, CommandSpec, SystemRunner};
    use collector::inspect::{CommandInspector, SystemInspector};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn runner() -> SystemRunner {
        SystemRunner::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn captures_stdout_as_columns() {
        let spec = CommandSpec::new("echo")
            .args(["root  1 0 0 09:00 ?", "00:00:01 /sbin/init   splash"])
            .max_fields(8);
        let lines = spec.run(&runner()).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].column(2).parse::<u32>(), Ok(1));
        assert_eq!(lines[0].column(8).text(), Ok("/sbin/init   splash"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_unless_allowed() {
        let spec = CommandSpec::new("sh").args(["-c", "echo partial; echo oops >&2; exit 3"]);
        match runner().output(&spec).await {
            Err(Error::ExitStatus { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let tolerant = spec.allow_failure(true);
        assert_eq!(runner().output(&tolerant).await.unwrap(), "partial\n");
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let spec = CommandSpec::new("definitely-not-a-real-program-7c1e");
        assert!(matches!(
            runner().output(&spec).await,
            Err(Error::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn stuck_command_is_killed_at_the_timeout() {
        let runner = SystemRunner::new(Duration::from_millis(200));
        let spec = CommandSpec::new("sleep").arg("30");

        let start = Instant::now();
        let result = runner.output(&spec).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn command_inspector_lists_processes() {
        let Ok(lines) = CommandInspector::new(Arc::new(runner())).processes().await else {
            // no procps in minimal containers
            return;
        };
        let own = std::process::id();
        assert!(
            lines
                .iter()
                .skip(1)
                .any(|line| line.column(2).parse::<u32>() == Ok(own)),
            "own pid missing from process listing"
        );
    }
}
