use std::path::Path;

use which::which;

use crate::command::{run_cmd, split};
use crate::utils::path_must_str;

/// Turns the binary AndroidManifest.xml inside an APK into textual XML
///
/// Decoding is somebody else's problem; this trait only captures the
/// "here's an APK, put readable XML there" contract so the scanner can be
/// tested without a decoder installed.
pub trait AxmlDecoder: Send + Sync {
    fn decode(&self, apk: &Path, output: &Path) -> crate::Result<()>;
}

/// Default decode command line, completed with `-o <output> <apk>`
pub const DEFAULT_AXML_COMMAND: &str = "androguard axml";

/// [AxmlDecoder] that shells out to an external decoder
///
/// The configured command is invoked once per APK as
/// `<command...> -o <output> <apk>`, which matches the androguard CLI.
pub struct ExecAxmlDecoder {
    program: String,
    args: Vec<String>,
}

impl ExecAxmlDecoder {
    pub fn new(command: &str) -> crate::Result<Self> {
        let mut parts = split(command)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| crate::Error::new_generic(&format!("bad decode command: {command}")))?;

        let program = parts.remove(0);
        let program = which(&program)
            .map_err(|_| crate::Error::MissingBin(program.clone()))?
            .to_string_lossy()
            .into_owned();

        Ok(Self {
            program,
            args: parts,
        })
    }

    pub fn default_decoder() -> crate::Result<Self> {
        Self::new(DEFAULT_AXML_COMMAND)
    }
}

impl AxmlDecoder for ExecAxmlDecoder {
    fn decode(&self, apk: &Path, output: &Path) -> crate::Result<()> {
        let mut args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        args.push("-o");
        args.push(path_must_str(output));
        args.push(path_must_str(apk));

        run_cmd(&self.program, args.as_slice())?
            .err_on_status()
            .map(|_| ())
    }
}
