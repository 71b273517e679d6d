//! Spill file creation helpers.

use std::{
    ffi::OsString,
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

/// Length of the random part of a spill file name.
const NAME_LEN: usize = 12;

/// Number of attempts to create a spill file under a fresh random name
/// before giving up.
const CREATE_ATTEMPTS: usize = 16;

/// Generates a spill file name with a random alphanumeric stem.
///
/// Creates a file name of the form `spill-{random_string}.tmp`, where
/// `random_string` is `len` alphanumeric characters long.
pub fn generate_spill_file_name(len: usize) -> OsString {
    let mut buf = OsString::with_capacity(len + 10);
    buf.push("spill-");
    let mut rng = fastrand::Rng::new();
    let mut char_buf = [0u8; 4];
    for c in std::iter::repeat_with(|| rng.alphanumeric()).take(len) {
        buf.push(c.encode_utf8(&mut char_buf));
    }
    buf.push(".tmp");
    buf
}

/// Creates a new uniquely named spill file in `dir`, open for reading and
/// writing.
///
/// The file is created with `create_new`, so a name collision fails the
/// attempt instead of truncating an existing file; a few fresh names are
/// tried before the error is returned. On Unix the file mode is `0o600`.
///
/// # Returns
///
/// The open file handle together with its path. The path remains valid for
/// the lifetime of the file: unlike anonymous temp files, spill files are
/// deleted by their owner, not on close.
pub fn create_spill_file(dir: &Path) -> io::Result<(File, PathBuf)> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut last_err = None;
    for _ in 0..CREATE_ATTEMPTS {
        let path = dir.join(generate_spill_file_name(NAME_LEN));
        match options.open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "spill file collision")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_spill_file_name_shape() {
        let name = generate_spill_file_name(12);
        let name = name.to_str().expect("utf8 name");
        assert!(name.starts_with("spill-"));
        assert!(name.ends_with(".tmp"));
        assert_eq!(name.len(), "spill-".len() + 12 + ".tmp".len());
        assert!(
            name["spill-".len()..name.len() - ".tmp".len()]
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        );
    }

    #[test]
    fn test_generate_spill_file_name_is_random() {
        let a = generate_spill_file_name(12);
        let b = generate_spill_file_name(12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_spill_file() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let (mut file, path) = create_spill_file(dir.path())?;
        assert!(path.exists());
        assert_eq!(path.parent(), Some(dir.path()));

        use std::io::Write;
        file.write_all(b"abc")?;
        assert_eq!(std::fs::read(&path)?, b"abc");
        Ok(())
    }

    #[test]
    fn test_create_spill_file_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("no-such-dir");
        let res = create_spill_file(&missing);
        assert!(res.is_err());
    }

    #[test]
    fn test_create_spill_file_distinct_paths() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let (_f1, p1) = create_spill_file(dir.path())?;
        let (_f2, p2) = create_spill_file(dir.path())?;
        assert_ne!(p1, p2);
        Ok(())
    }
}
