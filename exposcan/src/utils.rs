use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;

/// Check to see if the given pathlike type has the given extension
pub fn path_has_ext<P: AsRef<Path> + ?Sized>(p: &P, ext: &str) -> bool {
    let path = p.as_ref();
    path.extension().map_or(false, |it| it == ext)
}

/// Calls `to_str` on the path and returns the string, panicking if that fails
pub fn path_must_str(path: &Path) -> &str {
    path.to_str().expect("valid paths")
}

pub fn open_file(path: &Path) -> crate::Result<File> {
    match File::open(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_must_str(path).into())),
            _ => Err(e.into()),
        },
    }
}

pub fn read_file(path: &Path) -> crate::Result<String> {
    match fs::read_to_string(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_must_str(path).into())),
            _ => Err(e.into()),
        },
    }
}
