//! The simple evidence matchers: filename extension, declared MIME type,
//! XML root element, and text detection.
//!
//! All four are synchronous lookups or bounded probes returning the
//! indices of matching signatures; none of them feed the byte scorer.

mod mime;
mod name;
mod text;
mod xml;

pub use mime::MimeMatcher;
pub use name::NameMatcher;
pub use text::TextMatcher;
pub use xml::{XmlMatcher, XmlRoot};
