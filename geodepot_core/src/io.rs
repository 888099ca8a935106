//! Durable filesystem writes shared by the server and the client.

use anyhow::{Context, Result};
use std::{
	fs::{self, File, OpenOptions},
	io::Write,
	path::Path,
};

/// Write a file via temp-file-in-same-directory + fsync + atomic rename.
///
/// Readers either see the previous content or the complete new content,
/// never a torn write. The parent directory is fsynced afterwards so the
/// rename itself survives a crash.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
	let parent = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};
	fs::create_dir_all(parent).with_context(|| format!("creating directory {parent:?}"))?;

	let mut tmp = tempfile::NamedTempFile::new_in(parent).context("creating temp file")?;
	tmp.write_all(bytes).context("writing temp file")?;
	tmp.as_file().sync_all().context("syncing temp file")?;
	tmp.persist(path).with_context(|| format!("renaming temp file to {path:?}"))?;

	if let Ok(dir) = File::open(parent) {
		let _ = dir.sync_all();
	}
	Ok(())
}

/// Append one line to a log file with `O_APPEND` + fsync.
///
/// The line either appears complete or not at all; callers must not report
/// success to anyone before this returns.
pub fn append_line_durable(path: &Path, line: &str) -> Result<()> {
	let parent = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};
	fs::create_dir_all(parent).with_context(|| format!("creating directory {parent:?}"))?;

	let mut file = OpenOptions::new()
		.append(true)
		.create(true)
		.open(path)
		.with_context(|| format!("opening log file {path:?}"))?;
	file.write_all(line.as_bytes())?;
	file.write_all(b"\n")?;
	file.sync_all().context("syncing log file")?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_fs::TempDir;

	#[test]
	fn atomic_write_replaces_content() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("sub").join("file.json");
		atomic_write(&path, b"first").unwrap();
		assert_eq!(fs::read(&path).unwrap(), b"first");
		atomic_write(&path, b"second").unwrap();
		assert_eq!(fs::read(&path).unwrap(), b"second");
	}

	#[test]
	fn append_accumulates_lines() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("requests.jsonl");
		append_line_durable(&path, "{\"a\":1}").unwrap();
		append_line_durable(&path, "{\"b\":2}").unwrap();
		let content = fs::read_to_string(&path).unwrap();
		assert_eq!(content, "{\"a\":1}\n{\"b\":2}\n");
	}
}
