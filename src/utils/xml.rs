//! A minimal XML element tree, sufficient for `esriinfo/iteminfo.xml`.
//!
//! The item information document is a flat tree of elements with text
//! content and no meaningful attributes or namespaces, so this parser keeps
//! to exactly that subset: elements, text, comments, processing
//! instructions and CDATA. An element whose only content is text collapses
//! into that string.

use anyhow::{bail, Result};

/// One parsed element: either collapsed text content or a list of named
/// children (in document order; repeated names are kept).
#[derive(Clone, Debug, PartialEq)]
pub enum XmlNode {
	Text(String),
	Element(Vec<(String, XmlNode)>),
}

impl XmlNode {
	/// The first child with the given element name.
	pub fn get(&self, name: &str) -> Option<&XmlNode> {
		match self {
			XmlNode::Element(children) => children.iter().find(|(n, _)| n == name).map(|(_, node)| node),
			XmlNode::Text(_) => None,
		}
	}

	/// The collapsed text of this node, if it has any.
	pub fn text(&self) -> Option<&str> {
		match self {
			XmlNode::Text(text) => Some(text),
			XmlNode::Element(_) => None,
		}
	}

	/// Convenience: the collapsed text of a named child.
	pub fn child_text(&self, name: &str) -> Option<&str> {
		self.get(name).and_then(XmlNode::text)
	}
}

struct Parser<'a> {
	input: &'a [u8],
	pos: usize,
}

/// Parses a document and returns the root element's name and node.
pub fn parse_document(text: &str) -> Result<(String, XmlNode)> {
	let mut parser = Parser {
		input: text.as_bytes(),
		pos: 0,
	};
	parser.skip_misc();
	let root = parser.parse_element()?;
	Ok(root)
}

impl<'a> Parser<'a> {
	fn peek(&self) -> Option<u8> {
		self.input.get(self.pos).copied()
	}

	fn starts_with(&self, prefix: &[u8]) -> bool {
		self.input[self.pos..].starts_with(prefix)
	}

	fn skip_until(&mut self, needle: &[u8]) -> Result<()> {
		while self.pos < self.input.len() {
			if self.starts_with(needle) {
				self.pos += needle.len();
				return Ok(());
			}
			self.pos += 1;
		}
		bail!("unterminated construct, expected '{}'", String::from_utf8_lossy(needle));
	}

	/// Skips whitespace, the XML declaration, comments and doctypes.
	fn skip_misc(&mut self) {
		loop {
			while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
				self.pos += 1;
			}
			if self.starts_with(b"<?") {
				let _ = self.skip_until(b"?>");
			} else if self.starts_with(b"<!--") {
				let _ = self.skip_until(b"-->");
			} else if self.starts_with(b"<!") {
				let _ = self.skip_until(b">");
			} else {
				return;
			}
		}
	}

	fn parse_name(&mut self) -> Result<String> {
		let start = self.pos;
		while matches!(self.peek(), Some(b) if !b.is_ascii_whitespace() && b != b'>' && b != b'/' && b != b'=') {
			self.pos += 1;
		}
		if self.pos == start {
			bail!("expected an element name at byte {start}");
		}
		Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
	}

	/// Parses `<name ...>content</name>` or `<name ... />` at the cursor.
	fn parse_element(&mut self) -> Result<(String, XmlNode)> {
		if self.peek() != Some(b'<') {
			bail!("expected '<' at byte {}", self.pos);
		}
		self.pos += 1;
		let name = self.parse_name()?;

		// Attributes are skipped: iteminfo carries none that matter.
		loop {
			match self.peek() {
				Some(b'>') => {
					self.pos += 1;
					break;
				}
				Some(b'/') if self.starts_with(b"/>") => {
					self.pos += 2;
					return Ok((name, XmlNode::Element(Vec::new())));
				}
				Some(_) => self.pos += 1,
				None => bail!("unterminated start tag '<{name}'"),
			}
		}

		let mut children: Vec<(String, XmlNode)> = Vec::new();
		let mut text = String::new();

		loop {
			if self.starts_with(b"</") {
				self.pos += 2;
				let close = self.parse_name()?;
				if close != name {
					bail!("mismatched closing tag: expected '</{name}>', found '</{close}>'");
				}
				self.skip_until(b">")?;
				break;
			} else if self.starts_with(b"<![CDATA[") {
				let start = self.pos + 9;
				self.skip_until(b"]]>")?;
				text.push_str(&String::from_utf8_lossy(&self.input[start..self.pos - 3]));
			} else if self.starts_with(b"<!--") {
				self.skip_until(b"-->")?;
			} else if self.peek() == Some(b'<') {
				children.push(self.parse_element()?);
			} else if self.peek().is_some() {
				text.push(unescape_char(self));
			} else {
				bail!("unterminated element '<{name}>'");
			}
		}

		// Text-only elements collapse into their string content.
		if children.is_empty() {
			let trimmed = text.trim();
			return Ok((name, XmlNode::Text(trimmed.to_string())));
		}
		Ok((name, XmlNode::Element(children)))
	}
}

/// Consumes one character, resolving the five predefined entities.
fn unescape_char(parser: &mut Parser) -> char {
	const ENTITIES: [(&[u8], char); 5] = [
		(b"&lt;", '<'),
		(b"&gt;", '>'),
		(b"&amp;", '&'),
		(b"&quot;", '"'),
		(b"&apos;", '\''),
	];
	for (entity, ch) in ENTITIES {
		if parser.starts_with(entity) {
			parser.pos += entity.len();
			return ch;
		}
	}
	let rest = std::str::from_utf8(&parser.input[parser.pos..]).unwrap_or("?");
	let ch = rest.chars().next().unwrap_or('?');
	parser.pos += ch.len_utf8();
	ch
}
