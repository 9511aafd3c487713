//! Transcript tags.
//!
//! Every tool call is rendered into the conversation transcript as an
//! XML-like tag. A call produces any number of open "preview" tags while its
//! arguments stream in, then exactly one closed tag once it has executed:
//!
//! ```text
//! <sandcode-write-file path="src/a.ts" description="Add helper">export const a = 1;
//! <sandcode-write-file path="src/a.ts" description="Add helper">export const a = 1;</sandcode-write-file>
//! ```
//!
//! Tags are built as [`Tag`] records and only turned into text by
//! [`Tag::to_wire`], which is the single place escaping happens.

use crate::PartialArgs;
use std::fmt;

/// Element name prefix for every tag.
pub const TAG_PREFIX: &str = "sandcode-";

/// Pseudo tool name used for failure tags.
pub const ERROR_TAG: &str = "error";

/// One tool call's transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    tool: String,
    attrs: Vec<(String, String)>,
    body: String,
    complete: bool,
}

impl Tag {
    /// Create an open tag for the given tool.
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            attrs: Vec::new(),
            body: String::new(),
            complete: false,
        }
    }

    /// Error-flavored closed tag for a failed call.
    pub fn error(tool: &str, kind: &str, message: &str) -> Self {
        Tag::new(ERROR_TAG)
            .attr("tool", tool)
            .attr("kind", kind)
            .body(message)
            .closed()
    }

    /// Add an attribute. Values are escaped when serialized.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((key.into(), value.into()));
        self
    }

    /// Add an attribute only if a value is present.
    pub fn attr_opt(self, key: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.attr(key, value),
            None => self,
        }
    }

    /// Set the body text.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Mark the tag as closed.
    pub fn closed(mut self) -> Self {
        self.complete = true;
        self
    }

    /// Set whether the tag is closed.
    pub fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    /// Look up an attribute value by key.
    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> &str {
        &self.body
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Element name, e.g. `sandcode-write-file` for `write_file`.
    pub fn element(&self) -> String {
        format!("{TAG_PREFIX}{}", self.tool.replace('_', "-"))
    }

    /// Serialize to the transcript wire format.
    pub fn to_wire(&self) -> String {
        let element = self.element();
        let mut out = String::with_capacity(element.len() * 2 + self.body.len() + 16);
        out.push('<');
        out.push_str(&element);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');
        out.push_str(&escape_content(&self.body));
        if self.complete {
            out.push_str("</");
            out.push_str(&element);
            out.push('>');
        }
        out
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Escape a value for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Inverse of [`escape_attr`]. `&amp;` is decoded last.
pub fn unescape_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Escape body text. Quotes are left alone since the body is not an attribute.
pub fn escape_content(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Inverse of [`escape_content`]. `&amp;` is decoded last.
pub fn unescape_content(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Read a string argument from partially parsed arguments.
pub fn str_arg<'a>(args: &'a PartialArgs, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}
