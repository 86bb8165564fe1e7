//! Notification sink: best-effort delivery of run lifecycle messages.
//!
//! Delivery failures never influence a run's outcome; callers fold them into
//! engine messages and move on.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use tracing::debug;

use crate::io::config::{NotifyConfig, NotifyLevel};

/// Transport for outgoing notifications.
pub trait NotificationSink: Send + Sync {
    fn send_message(&self, text: &str) -> Result<()>;
    /// Deliver a file with an accompanying caption.
    fn send_file(&self, path: &Path, caption: &str) -> Result<()>;
}

/// Run lifecycle events a notifier can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,
    End,
}

impl RunEvent {
    fn as_str(self) -> &'static str {
        match self {
            RunEvent::Start => "start",
            RunEvent::End => "end",
        }
    }
}

/// Composes and routes lifecycle messages to one sink.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    level: NotifyLevel,
    caption: Option<String>,
    template: Option<String>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, level: NotifyLevel) -> Self {
        Self {
            sink,
            level,
            caption: None,
            template: None,
        }
    }

    /// Build the default command-backed notifier from config. Returns `None`
    /// when no command is configured.
    pub fn from_config(cfg: &NotifyConfig) -> Result<Option<Self>> {
        if cfg.command.is_empty() {
            return Ok(None);
        }
        let sink = CommandSink::new(cfg.command.clone())?;
        Ok(Some(Self {
            sink: Arc::new(sink),
            level: cfg.level,
            caption: cfg.caption.clone(),
            template: cfg.template.clone(),
        }))
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption;
        self
    }

    pub fn with_template(mut self, template: Option<String>) -> Self {
        self.template = template;
        self
    }

    pub fn level(&self) -> NotifyLevel {
        self.level
    }

    /// Send an explicit, user-authored message.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.sink.send_message(&self.apply_caption(text.to_string()))
    }

    pub fn announce_start(&self, name: &str) -> Result<()> {
        let text = self.compose(RunEvent::Start, name, "")?;
        self.sink.send_message(&text)
    }

    /// Announce a finished run; attaches the log file when one exists.
    pub fn announce_end(&self, name: &str, meaning: &str, log_file: Option<&Path>) -> Result<()> {
        let text = self.compose(RunEvent::End, name, meaning)?;
        if let Some(path) = log_file
            && path.is_file()
        {
            return self.sink.send_file(path, &text);
        }
        self.sink.send_message(&text)
    }

    fn compose(&self, event: RunEvent, name: &str, meaning: &str) -> Result<String> {
        let body = if let Some(source) = &self.template {
            let mut env = Environment::new();
            env.add_template("notify", source)
                .context("compile notify template")?;
            env.get_template("notify")?
                .render(context! {
                    event => event.as_str(),
                    name => name,
                    meaning => meaning,
                })
                .context("render notify template")?
        } else {
            match event {
                RunEvent::Start => format!("START {name}"),
                RunEvent::End => format!("END {name}\n{meaning}"),
            }
        };
        Ok(self.apply_caption(body))
    }

    fn apply_caption(&self, body: String) -> String {
        match &self.caption {
            Some(caption) => format!("{caption}:\n{body}"),
            None => body,
        }
    }
}

/// Default sink: pipes message text into a configured command's stdin. For
/// files, the file path is appended as a trailing argument and the caption is
/// piped instead.
pub struct CommandSink {
    command: Vec<String>,
}

impl CommandSink {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("notify command must not be empty"));
        }
        Ok(Self { command })
    }

    fn dispatch(&self, stdin_text: &str, extra_arg: Option<&str>) -> Result<()> {
        let mut invocation = Command::new(&self.command[0]);
        invocation.args(&self.command[1..]);
        if let Some(arg) = extra_arg {
            invocation.arg(arg);
        }
        let mut child = invocation
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn notify command `{}`", self.command[0]))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(stdin_text.as_bytes())
                .context("write notify message")?;
        }
        let status = child.wait().context("wait for notify command")?;
        if !status.success() {
            return Err(anyhow!(
                "notify command `{}` exited with {:?}",
                self.command[0],
                status.code()
            ));
        }
        debug!(command = %self.command[0], "notification delivered");
        Ok(())
    }
}

impl NotificationSink for CommandSink {
    fn send_message(&self, text: &str) -> Result<()> {
        self.dispatch(text, None)
    }

    fn send_file(&self, path: &Path, caption: &str) -> Result<()> {
        self.dispatch(caption, Some(&path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSink {
        messages: Mutex<Vec<String>>,
        files: Mutex<Vec<(String, String)>>,
    }

    impl NotificationSink for FakeSink {
        fn send_message(&self, text: &str) -> Result<()> {
            self.messages.lock().expect("lock").push(text.to_string());
            Ok(())
        }

        fn send_file(&self, path: &Path, caption: &str) -> Result<()> {
            self.files
                .lock()
                .expect("lock")
                .push((path.display().to_string(), caption.to_string()));
            Ok(())
        }
    }

    #[test]
    fn default_texts_follow_the_event() {
        let sink = Arc::new(FakeSink::default());
        let notifier = Notifier::new(sink.clone(), NotifyLevel::StartAndEnd);

        notifier.announce_start("build").expect("start");
        notifier.announce_end("build", "run successful", None).expect("end");

        let messages = sink.messages.lock().expect("lock");
        assert_eq!(messages[0], "START build");
        assert_eq!(messages[1], "END build\nrun successful");
    }

    #[test]
    fn caption_prefixes_every_message() {
        let sink = Arc::new(FakeSink::default());
        let notifier = Notifier::new(sink.clone(), NotifyLevel::StartAndEnd)
            .with_caption(Some("pipeline".to_string()));

        notifier.announce_start("build").expect("start");
        notifier.send_text("manual note").expect("send");

        let messages = sink.messages.lock().expect("lock");
        assert_eq!(messages[0], "pipeline:\nSTART build");
        assert_eq!(messages[1], "pipeline:\nmanual note");
    }

    #[test]
    fn template_replaces_the_default_body() {
        let sink = Arc::new(FakeSink::default());
        let notifier = Notifier::new(sink.clone(), NotifyLevel::EndOnly)
            .with_template(Some("{{ event }} {{ name }}: {{ meaning }}".to_string()));

        notifier
            .announce_end("build", "run successful", None)
            .expect("end");

        let messages = sink.messages.lock().expect("lock");
        assert_eq!(messages[0], "end build: run successful");
    }

    #[test]
    fn end_announcement_attaches_an_existing_log_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("log.json");
        fs::write(&log, "[]\n").expect("write");

        let sink = Arc::new(FakeSink::default());
        let notifier = Notifier::new(sink.clone(), NotifyLevel::EndOnly);

        notifier
            .announce_end("build", "run successful", Some(&log))
            .expect("end");
        notifier
            .announce_end("build", "run successful", Some(&temp.path().join("gone.json")))
            .expect("end");

        let files = sink.files.lock().expect("lock");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, log.display().to_string());
        assert_eq!(files[0].1, "END build\nrun successful");
        let messages = sink.messages.lock().expect("lock");
        assert_eq!(messages.len(), 1, "missing file falls back to text");
    }

    #[test]
    fn command_sink_pipes_message_to_stdin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("inbox.txt");
        let sink = CommandSink::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > {}", out.display()),
        ])
        .expect("sink");

        sink.send_message("ping").expect("send");
        assert_eq!(fs::read_to_string(&out).expect("read"), "ping");
    }

    #[test]
    fn command_sink_passes_file_path_as_argument() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = temp.path().join("inbox.txt");
        let attachment = temp.path().join("log.json");
        fs::write(&attachment, "[]\n").expect("write");

        let sink = CommandSink::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > {out}; echo \"$1\" >> {out}", out = out.display()),
            "notify".to_string(),
        ])
        .expect("sink");

        sink.send_file(&attachment, "caption").expect("send");
        let contents = fs::read_to_string(&out).expect("read");
        assert_eq!(contents, format!("caption{}\n", attachment.display()));
    }

    #[test]
    fn failing_command_reports_an_error() {
        let sink = CommandSink::new(vec!["false".to_string()]).expect("sink");
        assert!(sink.send_message("ping").is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandSink::new(Vec::new()).is_err());
        let cfg = NotifyConfig::default();
        assert!(Notifier::from_config(&cfg).expect("from config").is_none());
    }
}
