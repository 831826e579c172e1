//! On-disk HTML previews of rendered messages.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::RenderError;
use crate::records::Address;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.+-]+").expect("preview filename pattern is valid"));

/// Writes one `preview_<recipient>.html` file per rendered message.
#[derive(Debug, Clone)]
pub struct PreviewWriter {
    dir: PathBuf,
}

impl PreviewWriter {
    /// Create the output directory (and parents) if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, RenderError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the HTML body for a batch recipient.
    pub fn write(&self, recipient: &Address, html: &str) -> Result<PathBuf, RenderError> {
        self.write_named(&preview_file_name(recipient.as_str()), html)
    }

    /// Write the HTML body of the `--test` message.
    pub fn write_test(&self, html: &str) -> Result<PathBuf, RenderError> {
        self.write_named("preview_test.html", html)
    }

    fn write_named(&self, name: &str, html: &str) -> Result<PathBuf, RenderError> {
        let path = self.dir.join(name);
        std::fs::write(&path, html)?;
        debug!(path = %path.display(), "Preview written");
        Ok(path)
    }
}

/// `preview_<address>.html`, with runs of filename-unsafe characters collapsed to `_`.
pub fn preview_file_name(address: &str) -> String {
    format!("preview_{}.html", UNSAFE_CHARS.replace_all(address, "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::address;

    #[test]
    fn file_names_sanitized() {
        assert_eq!(preview_file_name("ana@client.test"), "preview_ana_client.test.html");
        assert_eq!(preview_file_name("a+tag@x.io"), "preview_a+tag_x.io.html");
        assert_eq!(preview_file_name("we(ird)@x.io"), "preview_we_ird_x.io.html");
    }

    #[test]
    fn creates_nested_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("out").join("previews");
        let writer = PreviewWriter::create(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(writer.dir(), dir.as_path());
    }

    #[test]
    fn writes_recipient_and_test_previews() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = PreviewWriter::create(tmp.path()).unwrap();

        let to = address::validate("ana@client.test").unwrap();
        let path = writer.write(&to, "<p>Hi Ana</p>").unwrap();
        assert_eq!(path, tmp.path().join("preview_ana_client.test.html"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<p>Hi Ana</p>");

        let test = writer.write_test("<p>test</p>").unwrap();
        assert_eq!(test, tmp.path().join("preview_test.html"));
        assert_eq!(std::fs::read_to_string(&test).unwrap(), "<p>test</p>");
    }
}
