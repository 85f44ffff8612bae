//! Services a loopback device can open

use adbridge_core::Banner;
use bytes::{Bytes, BytesMut};

/// What to run for a requested service name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Service {
    /// Every input chunk is sent straight back
    Echo,
    /// Line-oriented shell; `exit` ends it
    Shell,
    /// `shell:<command>`: run one command, then close
    Command(String),
}

impl Service {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "echo" | "echo:" => Some(Self::Echo),
            "shell" | "shell:" => Some(Self::Shell),
            _ => name
                .strip_prefix("shell:")
                .map(|command| Self::Command(command.to_string())),
        }
    }
}

/// Output of one shell command line
pub(crate) enum Outcome {
    Output(String),
    Exit,
}

pub(crate) fn run_command(line: &str, banner: &Banner) -> Outcome {
    let line = line.trim();
    let (program, args) = match line.split_once(char::is_whitespace) {
        Some((program, args)) => (program, args.trim()),
        None => (line, ""),
    };

    match program {
        "" => Outcome::Output(String::new()),
        "exit" => Outcome::Exit,
        "echo" => Outcome::Output(format!("{}\n", args)),
        "getprop" => {
            let value = match args {
                "ro.product.name" => banner.product.clone(),
                "ro.product.model" => banner.model.clone(),
                "ro.product.device" => banner.device.clone(),
                _ => None,
            };
            Outcome::Output(format!("{}\n", value.unwrap_or_default()))
        }
        _ => Outcome::Output(format!("{}: not found\n", program)),
    }
}

/// Accumulates shell input and hands out complete lines
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line = self.pending.split_to(end + 1);
        Some(String::from_utf8_lossy(&line[..end]).trim_end_matches('\r').to_string())
    }
}

/// Split `data` into frames of at most `max` bytes
pub(crate) fn frames(data: Bytes, max: usize) -> Vec<Bytes> {
    let max = max.max(1);
    let mut data = data;
    let mut out = Vec::with_capacity(data.len() / max + 1);
    while data.len() > max {
        out.push(data.split_to(max));
    }
    if !data.is_empty() {
        out.push(data);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_names() {
        assert_eq!(Service::parse("shell"), Some(Service::Shell));
        assert_eq!(Service::parse("shell:"), Some(Service::Shell));
        assert_eq!(Service::parse("echo"), Some(Service::Echo));
        assert_eq!(
            Service::parse("shell:echo hi"),
            Some(Service::Command("echo hi".to_string()))
        );
        assert_eq!(Service::parse("sync:"), None);
    }

    #[test]
    fn test_commands() {
        let banner = Banner {
            model: Some("Pixel".to_string()),
            ..Default::default()
        };
        let output = |line| match run_command(line, &banner) {
            Outcome::Output(out) => out,
            Outcome::Exit => "<exit>".to_string(),
        };

        assert_eq!(output("echo hi"), "hi\n");
        assert_eq!(output("getprop ro.product.model"), "Pixel\n");
        assert_eq!(output("getprop ro.product.name"), "\n");
        assert_eq!(output("reboot now"), "reboot: not found\n");
        assert_eq!(output("   "), "");
        assert_eq!(output("exit"), "<exit>");
    }

    #[test]
    fn test_line_buffer() {
        let mut lines = LineBuffer::default();
        lines.push(b"echo h");
        assert_eq!(lines.next_line(), None);
        lines.push(b"i\r\nexit\n");
        assert_eq!(lines.next_line().as_deref(), Some("echo hi"));
        assert_eq!(lines.next_line().as_deref(), Some("exit"));
        assert_eq!(lines.next_line(), None);
    }

    #[test]
    fn test_frames() {
        let chunks = frames(Bytes::from(vec![7u8; 10]), 4);
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(frames(Bytes::new(), 4).is_empty());
    }
}
