#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(clippy::all)]

#[macro_use]
mod object;
pub use crate::object::{Dictionary, Object, ObjectId, Stream, StringFormat, FREE_GENERATION};

mod document;
pub use crate::document::{Document, ParseOptions};

pub mod encryption;
pub use crate::encryption::{Material, Permissions};

mod error;
pub use crate::error::{Error, Result, XrefError};

pub mod filters;

mod object_stream;
pub use crate::object_stream::ObjectStream;

mod parser;
mod reader;
mod recovery;
mod resolver;

mod scanner;
pub use crate::scanner::Scanner;

mod scratch;
pub use crate::scratch::Scratch;

mod source;
pub use crate::source::{ScopedSeek, Source};

mod xref;
pub use crate::xref::{Xref, XrefEntry, XrefKind};

mod xref_stream;
pub use crate::xref_stream::decode_xref_stream;
