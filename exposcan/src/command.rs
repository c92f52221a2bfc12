use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::process::{Command, ExitStatus, Output};

use log::Level::Debug;
use log::{debug, log_enabled};

pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    /// Converts to a `Result` object that is `Ok` only if the [ExitStatus] is
    /// success.
    pub fn err_on_status(self) -> crate::Result<Self> {
        if self.status.success() {
            return Ok(self);
        }

        let code = self.status.code().unwrap_or(-1);

        Err(crate::Error::CommandError(
            code,
            self.stderr_utf8_lossy().to_string(),
        ))
    }

    #[inline]
    pub fn stderr_utf8_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl From<Output> for CmdOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Splits a string for use as a shell command
pub fn split<'a>(s: &'a str) -> Option<Vec<String>> {
    let mut escaped = false;
    let mut single_quote = false;
    let mut double_quote = false;

    let mut into = String::new();

    let mut sp = Vec::new();

    macro_rules! finish {
        () => {
            sp.push(into.clone());
            into.clear();
        };
    }

    for c in s.chars() {
        if escaped {
            escaped = false;
            into.push(c);
            continue;
        }

        match c {
            '\\' => {
                escaped = true;
            }

            '\'' if single_quote => {
                single_quote = false;
                finish!();
            }

            '\'' if !double_quote => {
                single_quote = true;
            }

            '"' if double_quote => {
                double_quote = false;
                finish!();
            }

            '"' if !single_quote => {
                double_quote = true;
            }

            _ => {
                if single_quote || double_quote || !c.is_whitespace() {
                    into.push(c);
                } else if into.len() > 0 {
                    finish!();
                }
            }
        }
    }

    if escaped | single_quote | double_quote {
        return None;
    }

    if into.len() > 0 {
        sp.push(into);
    }

    Some(sp)
}

pub fn run_cmd<C, S>(cmd: C, args: &[S]) -> io::Result<CmdOutput>
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    if log_enabled!(Debug) {
        log_cmd(&cmd, args);
    }
    Command::new(cmd)
        .args(args)
        .output()
        .map(|output| output.into())
}

pub fn log_cmd<C, S>(cmd: &C, args: &[S])
where
    C: AsRef<OsStr>,
    S: AsRef<OsStr>,
{
    let nargs = args.len();
    if nargs > 0 {
        let mut args_string = String::new();
        for (i, e) in args.iter().enumerate() {
            args_string.push_str(&e.as_ref().to_string_lossy());
            if i < nargs - 1 {
                args_string.push(' ');
            }
        }
        debug!(
            "Running command: `{} {}`",
            cmd.as_ref().to_string_lossy(),
            args_string
        );
    } else {
        debug!("Running command: `{}`", cmd.as_ref().to_string_lossy());
    }
}
