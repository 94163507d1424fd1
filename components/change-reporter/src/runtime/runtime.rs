// Local crates
use crate::{
    helpers::{
        load_config::{RunMode, Settings},
        shutdown::Shutdown,
    },
    source::source::{ChangeSource, JsonLinesSource, SampleChangeSource},
    submitter::submitter::ChangeSubmissionClient,
};

// External crates
use anyhow::{Context, Result};
use tracing::{info, instrument};

/// Change reporter runtime: build the client, submit every changeset the
/// configured source yields, then stay alive according to the run mode.
#[instrument(name = "change_reporter::run", skip_all, level = "debug")]
pub async fn run_change_reporter(settings: Settings) -> Result<()> {
    let shutdown = Shutdown::new();
    if settings.run_mode == RunMode::Forever {
        shutdown.listen_for_signals();
    }

    let client = ChangeSubmissionClient::new(&settings)
        .context("Failed to create admin server client")?;

    match &settings.changes {
        Some(path) => {
            let source = JsonLinesSource::open(path).await?;
            drive(&client, source, settings.run_mode, &shutdown).await
        }
        None => drive(&client, SampleChangeSource::default(), settings.run_mode, &shutdown).await,
    }
}

/// Submit everything `source` yields, then wait per `run_mode`.
///
/// A stop signal ends the run at once, even while `source` is still waiting
/// for its next changeset.
pub async fn drive<S: ChangeSource>(
    client: &ChangeSubmissionClient,
    mut source: S,
    run_mode: RunMode,
    shutdown: &Shutdown,
) -> Result<()> {
    // Subscribe before anything can trigger, so no stop signal is missed.
    let mut stop = shutdown.subscribe();

    let mut submitted = 0usize;
    loop {
        let change = tokio::select! {
            change = source.next_change() => change,
            _ = stop.recv() => {
                info!(
                    submitted,
                    in_flight = client.in_flight(),
                    "Stopping change reporter before the change source was exhausted"
                );
                return Ok(());
            }
        };
        let Some(change) = change else {
            break;
        };
        client.submit_change(&change.namespace, change.payload);
        submitted += 1;
    }
    info!(submitted, run_mode = %run_mode, "All changesets dispatched");

    match run_mode {
        RunMode::UntilIdle => {
            client.wait_idle().await;
            info!("All submissions completed, exiting");
        }
        RunMode::Forever => {
            let _ = stop.recv().await;
            info!(in_flight = client.in_flight(), "Stopping change reporter");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submitter::models::Changeset;
    use httpmock::prelude::*;
    use std::collections::VecDeque;

    struct ScriptedSource(VecDeque<Changeset>);

    impl ChangeSource for ScriptedSource {
        async fn next_change(&mut self) -> Option<Changeset> {
            self.0.pop_front()
        }
    }

    fn settings_for(server: &MockServer, run_mode: RunMode) -> Settings {
        Settings {
            admin_server_host: server.host(),
            admin_server_port: server.port(),
            run_mode,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn until_idle_returns_after_submissions_complete() {
        let server = MockServer::start_async().await;
        let ns1 = server
            .mock_async(|when, then| {
                when.method(POST).path("/submit_change/ns1");
                then.status(200);
            })
            .await;
        let ns2 = server
            .mock_async(|when, then| {
                when.method(POST).path("/submit_change/ns2");
                then.status(500);
            })
            .await;

        let settings = settings_for(&server, RunMode::UntilIdle);
        let client = ChangeSubmissionClient::new(&settings).expect("client");
        let source = ScriptedSource(VecDeque::from([
            Changeset::new("ns1", "{}"),
            Changeset::new("ns2", "{}"),
        ]));

        drive(&client, source, RunMode::UntilIdle, &Shutdown::new())
            .await
            .expect("driver");

        ns1.assert_async().await;
        ns2.assert_async().await;
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn forever_runs_until_stop_signal() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/submit_change/foo");
                then.status(200);
            })
            .await;

        let settings = settings_for(&server, RunMode::Forever);
        let client = ChangeSubmissionClient::new(&settings).expect("client");
        let shutdown = Shutdown::new();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            stopper.trigger();
        });

        drive(&client, SampleChangeSource::default(), RunMode::Forever, &shutdown)
            .await
            .expect("driver");

        client.wait_idle().await;
        mock.assert_async().await;
    }

    /// Yields its scripted changesets, then waits forever like an idle feed.
    struct OpenEndedSource(VecDeque<Changeset>);

    impl ChangeSource for OpenEndedSource {
        async fn next_change(&mut self) -> Option<Changeset> {
            match self.0.pop_front() {
                Some(change) => Some(change),
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn stop_signal_interrupts_a_pending_source() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/submit_change/ns1");
                then.status(200);
            })
            .await;

        let settings = settings_for(&server, RunMode::Forever);
        let client = ChangeSubmissionClient::new(&settings).expect("client");
        let shutdown = Shutdown::new();
        let source = OpenEndedSource(VecDeque::from([Changeset::new("ns1", "{}")]));

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            stopper.trigger();
        });

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            drive(&client, source, RunMode::Forever, &shutdown),
        )
        .await
        .expect("drive returns once stopped")
        .expect("driver");

        client.wait_idle().await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn reporter_submits_changes_from_feed() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/submit_change/org.gnome.gsettings")
                    .body(r#"{"key":"/org/gnome/desktop/interface/gtk-theme"}"#);
                then.status(200).body(r#"{"status": "ok"}"#);
            })
            .await;

        let dir = tempfile::TempDir::new().expect("temp dir");
        let feed = dir.path().join("changes.jsonl");
        std::fs::write(
            &feed,
            r#"{"namespace": "org.gnome.gsettings", "payload": {"key": "/org/gnome/desktop/interface/gtk-theme"}}"#,
        )
        .expect("write feed");

        let settings = Settings {
            changes: Some(feed),
            ..settings_for(&server, RunMode::UntilIdle)
        };
        run_change_reporter(settings).await.expect("reporter");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_feed_fails_before_any_submission() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let settings = Settings {
            changes: Some(dir.path().join("absent.jsonl")),
            run_mode: RunMode::UntilIdle,
            ..Settings::default()
        };
        assert!(run_change_reporter(settings).await.is_err());
    }
}
