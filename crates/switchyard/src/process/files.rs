use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Replaces `path` with `contents` through a fsync'd temporary file, so a
/// reader sees either the previous generation's payload or ours.
pub(super) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("switchyardd"),
    );
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replaces_existing_contents() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("switchyardd.pid");
        atomic_write(&path, b"1\n").expect("first write");
        atomic_write(&path, b"22\n").expect("second write");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "22\n");
        let leftovers = std::fs::read_dir(temp.path()).expect("list").count();
        assert_eq!(leftovers, 1, "temporary files must not remain");
    }
}
