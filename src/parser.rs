//! The object reader: parses one PDF primitive at a given position.
//!
//! Everything here is position-independent — callers hand in a byte slice
//! and an offset, and get back a parsed value plus (for streams) a payload
//! descriptor. Stream payloads are never consumed here; the resolver owns
//! length validation and materialization.

use crate::scanner::{is_delimiter, is_whitespace};
use crate::xref::{Xref, XrefEntry, XrefKind};
use crate::{Dictionary, Error, Object, ObjectId, Stream, StringFormat};
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::{digit0, digit1, one_of};
use nom::character::{is_hex_digit, is_oct_digit};
use nom::combinator::{eof, map, map_opt, map_res, opt, peek, verify};
use nom::error::{ErrorKind, ParseError};
use nom::multi::{count, fold_many0, fold_many1, many0};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated, tuple};
use nom::IResult;
use nom::Slice;
use nom_locate::LocatedSpan;

pub(crate) type ParserInput<'a> = LocatedSpan<&'a [u8]>;
pub(crate) type NomError<'a> = nom::error::Error<ParserInput<'a>>;
pub(crate) type NomResult<'a, O, E = NomError<'a>> = IResult<ParserInput<'a>, O, E>;

/// Maximum allowed nesting of literal strings.
pub(crate) const MAX_BRACKET: usize = 100;

#[inline]
fn strip_nom<O>(r: NomResult<O>) -> Option<O> {
    r.ok().map(|(_, o)| o)
}

#[inline]
fn convert_result<O, E>(result: Result<O, E>, input: ParserInput, error_kind: ErrorKind) -> NomResult<O> {
    result.map(|o| (input, o)).map_err(|_| {
        let err: NomError = nom::error::Error::from_error_kind(input, error_kind);
        nom::Err::Error(err)
    })
}

pub(crate) fn eol(input: ParserInput) -> NomResult<ParserInput> {
    alt((tag(b"\r\n"), tag(b"\n"), tag(b"\r")))(input)
}

pub(crate) fn comment(input: ParserInput) -> NomResult<()> {
    map(
        tuple((
            tag(b"%"),
            take_while(|c: u8| !b"\r\n".contains(&c)),
            alt((map(eol, |_| ()), map(eof, |_| ()))),
        )),
        |_| (),
    )(input)
}

#[inline]
fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[inline]
fn is_direct_literal_string(c: u8) -> bool {
    !b"()\\\r\n".contains(&c)
}

fn white_space(input: ParserInput) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ())(input)
}

fn space(input: ParserInput) -> NomResult<()> {
    fold_many0(
        alt((map(take_while1(is_whitespace), |_| ()), comment)),
        || {},
        |_, _| (),
    )(input)
}

fn integer(input: ParserInput) -> NomResult<i64> {
    let (i, _) = pair(opt(one_of("+-")), digit1)(input)?;

    let int_input = &input[..input.len() - i.len()];
    convert_result(i64::from_str(str::from_utf8(int_input).unwrap()), i, ErrorKind::Digit)
}

fn real(input: ParserInput) -> NomResult<f32> {
    let (i, _) = pair(
        opt(one_of("+-")),
        alt((
            map(tuple((digit1, tag(b"."), digit0)), |_| ()),
            map(pair(tag(b"."), digit1), |_| ()),
        )),
    )(input)?;

    let float_input = &input[..input.len() - i.len()];
    convert_result(f32::from_str(str::from_utf8(float_input).unwrap()), i, ErrorKind::Digit)
}

pub(crate) fn hex_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        verify(take(2usize), |h: &ParserInput| h.iter().copied().all(is_hex_digit)),
        |x: ParserInput| u8::from_str_radix(str::from_utf8(&x).unwrap(), 16),
    )(input)
}

fn oct_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        take_while_m_n(1, 3, is_oct_digit),
        // Overflow is ignored per the spec.
        |x: ParserInput| u16::from_str_radix(str::from_utf8(&x).unwrap(), 8).map(|o| o as u8),
    )(input)
}

pub(crate) fn name(input: ParserInput) -> NomResult<Vec<u8>> {
    preceded(
        tag(b"/"),
        many0(alt((
            preceded(tag(b"#"), hex_char),
            map_opt(take(1usize), |c: ParserInput| {
                if c[0] != b'#' && is_regular(c[0]) {
                    Some(c[0])
                } else {
                    None
                }
            }),
        ))),
    )(input)
}

fn escape_sequence(input: ParserInput) -> NomResult<Option<u8>> {
    preceded(
        tag(b"\\"),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(b"n"), |_| Some(b'\n')),
            map(tag(b"r"), |_| Some(b'\r')),
            map(tag(b"t"), |_| Some(b'\t')),
            map(tag(b"b"), |_| Some(b'\x08')),
            map(tag(b"f"), |_| Some(b'\x0C')),
            map(take(1usize), |c: ParserInput| Some(c[0])),
        )),
    )(input)
}

enum InnerLiteralString<'a> {
    Direct(ParserInput<'a>),
    Escape(Option<u8>),
    Eol(ParserInput<'a>),
    Nested(Vec<u8>),
}

impl<'a> InnerLiteralString<'a> {
    fn push(&self, output: &mut Vec<u8>) {
        match self {
            InnerLiteralString::Direct(s) | InnerLiteralString::Eol(s) => output.extend_from_slice(s),
            InnerLiteralString::Escape(e) => output.extend(e),
            InnerLiteralString::Nested(n) => output.extend_from_slice(n),
        }
    }
}

fn inner_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(is_direct_literal_string), InnerLiteralString::Direct),
                map(escape_sequence, InnerLiteralString::Escape),
                map(eol, InnerLiteralString::Eol),
                map(nested_literal_string(depth), InnerLiteralString::Nested),
            )),
            Vec::new,
            |mut out: Vec<u8>, value| {
                value.push(&mut out);
                out
            },
        )(input)
    }
}

fn nested_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            map(verify(tag(b"too deep"), |_| false), |_| vec![])(input)
        } else {
            map(
                delimited(tag(b"("), inner_literal_string(depth - 1), tag(b")")),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            )(input)
        }
    }
}

fn literal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    delimited(tag(b"("), inner_literal_string(MAX_BRACKET), tag(b")"))(input)
}

#[inline]
fn hex_digit(input: ParserInput) -> NomResult<u8> {
    map_opt(take(1usize), |c: ParserInput| {
        str::from_utf8(&c).ok().and_then(|c| u8::from_str_radix(c, 16).ok())
    })(input)
}

fn hexadecimal_string(input: ParserInput) -> NomResult<Object> {
    map(
        delimited(
            tag(b"<"),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || -> (Vec<u8>, bool) { (Vec::new(), false) },
                    |state, c| match state {
                        (mut out, false) => {
                            out.push(c << 4);
                            (out, true)
                        }
                        (mut out, true) => {
                            *out.last_mut().unwrap() |= c;
                            (out, false)
                        }
                    },
                ),
                white_space,
            ),
            tag(b">"),
        ),
        |(bytes, _)| Object::String(bytes, StringFormat::Hexadecimal),
    )(input)
}

fn boolean(input: ParserInput) -> NomResult<Object> {
    alt((
        map(tag(b"true"), |_| Object::Boolean(true)),
        map(tag(b"false"), |_| Object::Boolean(false)),
    ))(input)
}

fn null(input: ParserInput) -> NomResult<Object> {
    map(tag(b"null"), |_| Object::Null)(input)
}

fn array(input: ParserInput) -> NomResult<Vec<Object>> {
    delimited(pair(tag(b"["), space), many0(_direct_object), tag(b"]"))(input)
}

pub(crate) fn dictionary(input: ParserInput) -> NomResult<Dictionary> {
    delimited(
        pair(tag(b"<<"), space),
        fold_many0(
            pair(terminated(name, space), _direct_object),
            Dictionary::new,
            |mut dict, (key, value)| {
                dict.set(key, value);
                dict
            },
        ),
        tag(b">>"),
    )(input)
}

/// A stream header: dictionary, the `stream` keyword and its EOL. The
/// payload itself is left in place; the returned [`Stream`] records where
/// the data begins, as an offset into the buffer the span was built over.
fn stream(input: ParserInput) -> NomResult<Object> {
    let (i, dict) = terminated(dictionary, tuple((space, tag(b"stream"), opt(tag(b" ")), eol)))(input)?;
    let data_start = i.location_offset() as u64;
    Ok((i, Object::Stream(Stream::with_position(dict, data_start))))
}

fn unsigned_int<I: FromStr>(input: ParserInput) -> NomResult<I> {
    map_res(digit1, |digits: ParserInput| {
        I::from_str(str::from_utf8(&digits).unwrap())
    })(input)
}

fn object_id(input: ParserInput) -> NomResult<ObjectId> {
    pair(terminated(unsigned_int, space), terminated(unsigned_int, space))(input)
}

fn reference(input: ParserInput) -> NomResult<Object> {
    map(terminated(object_id, tag(b"R")), Object::Reference)(input)
}

fn _direct_objects(input: ParserInput) -> NomResult<Object> {
    alt((
        null,
        boolean,
        reference,
        map(real, Object::Real),
        map(integer, Object::Integer),
        map(name, Object::Name),
        map(literal_string, Object::string_literal),
        hexadecimal_string,
        map(array, Object::Array),
        map(dictionary, Object::Dictionary),
    ))(input)
}

fn _direct_object(input: ParserInput) -> NomResult<Object> {
    terminated(_direct_objects, space)(input)
}

/// Parse one direct (non-indirect) value at the start of `input`.
pub fn direct_object(input: &[u8]) -> Option<Object> {
    strip_nom(_direct_object(LocatedSpan::new(input)))
}

fn object(input: ParserInput) -> NomResult<Object> {
    alt((terminated(stream, space), terminated(_direct_objects, space)))(input)
}

/// Parse an indirect object (`N G obj …`) at `offset` within `buffer`.
///
/// For streams the terminator handling is deferred to the resolver; for
/// every other value an optional `endobj` is consumed. Stream payload
/// positions are rebased to absolute offsets before returning.
pub fn indirect_object(buffer: &[u8], offset: u64, expected_id: Option<ObjectId>) -> crate::Result<(ObjectId, Object)> {
    let input = LocatedSpan::new(buffer).slice(offset as usize..);

    let (i, (_, object_id)) = terminated(tuple((space, object_id)), pair(tag(b"obj"), space))(input)
        .map_err(|_: nom::Err<NomError>| Error::CorruptObject { offset })?;

    if let Some(expected_id) = expected_id {
        if object_id != expected_id {
            return Err(Error::ObjectMismatch {
                offset,
                expected: expected_id,
                found: object_id,
            });
        }
    }

    // The located span keeps absolute offsets, so stream payload positions
    // come out already rebased to `buffer`.
    let (_, parsed) = terminated(object, pair(space, opt(pair(tag(b"endobj"), space))))(i)
        .map_err(|_: nom::Err<NomError>| Error::CorruptObject { offset })?;

    Ok((object_id, parsed))
}

/// Parse a bare `N G obj` header at the start of `input`, tolerating
/// leading white space. Returns `None` unless the keyword is followed by a
/// delimiter, white space, or end of input.
pub fn object_header(input: &[u8]) -> Option<ObjectId> {
    strip_nom(_object_header(LocatedSpan::new(input)))
}

fn _object_header(input: ParserInput) -> NomResult<ObjectId> {
    terminated(
        preceded(space, object_id),
        pair(
            tag(b"obj"),
            peek(alt((
                map(verify(take(1usize), |c: &ParserInput| {
                    is_whitespace(c[0]) || is_delimiter(c[0])
                }), |_| ()),
                map(eof, |_| ()),
            ))),
        ),
    )(input)
}

/// True when `input` starts with an indirect object whose value is a
/// dictionary or stream carrying `/Type /XRef`.
pub fn is_xref_stream_header(input: &[u8]) -> bool {
    let span = LocatedSpan::new(input);
    let parsed = terminated(tuple((space, object_id)), pair(tag(b"obj"), space))(span)
        .ok()
        .and_then(|(i, _)| strip_nom(dictionary(i)));
    match parsed {
        Some(dict) => dict.has_type(b"XRef"),
        None => false,
    }
}

/// Parse the `%PDF-M.m` (or `%FDF-M.m`) header, tolerating at most one
/// line of garbage before it.
pub fn header(input: &[u8]) -> Option<String> {
    fn header_line(input: ParserInput) -> NomResult<String> {
        map_res(
            delimited(
                alt((tag(b"%PDF-"), tag(b"%FDF-"))),
                take_while(|c: u8| !b"\r\n".contains(&c)),
                alt((map(eol, |_| ()), map(eof, |_| ()))),
            ),
            |v: ParserInput| str::from_utf8(&v).map(Into::into),
        )(input)
    }

    let span = LocatedSpan::new(input);
    if let Some(version) = strip_nom(header_line(span)) {
        return Some(version);
    }

    // One junk line before the header is tolerated.
    let (rest, _) = pair(take_while(|c: u8| !b"\r\n".contains(&c)), eol)(span).ok()?;
    strip_nom(header_line(rest))
}

fn xref_entry(input: ParserInput) -> NomResult<(u64, u32, bool)> {
    map(
        tuple((
            terminated(unsigned_int::<u64>, tag(b" ")),
            terminated(unsigned_int::<u32>, tag(b" ")),
            terminated(one_of("nf"), take_while1(is_whitespace)),
        )),
        |(offset, generation, kind)| (offset, generation, kind == 'n'),
    )(input)
}

fn xref_section(input: ParserInput) -> NomResult<(u64, Vec<(u64, u32, bool)>)> {
    let (i, (start, entries)) = separated_pair(unsigned_int::<u64>, tag(b" "), unsigned_int::<usize>)(input)?;
    let (i, _) = pair(opt(tag(b" ")), eol)(i)?;
    let (i, rows) = count(xref_entry, entries)(i)?;
    Ok((i, (start, rows)))
}

/// Parse a textual cross-reference table into an [`Xref`].
pub(crate) fn xref_table(input: ParserInput) -> NomResult<Xref> {
    delimited(
        pair(tag(b"xref"), take_while1(is_whitespace)),
        fold_many1(
            xref_section,
            || Xref::new(0, XrefKind::Table),
            |mut xref, (start, rows)| {
                for (index, (offset, generation, in_use)) in rows.into_iter().enumerate() {
                    let number = start + index as u64;
                    if in_use {
                        xref.insert((number, generation), XrefEntry::Normal { offset });
                    } else {
                        xref.insert(
                            (number, generation),
                            XrefEntry::Free {
                                next_free: (offset, generation),
                            },
                        );
                    }
                }
                xref
            },
        ),
        space,
    )(input)
}

pub(crate) fn trailer(input: ParserInput) -> NomResult<Dictionary> {
    delimited(pair(tag(b"trailer"), space), dictionary, space)(input)
}

/// Parse a table-form cross-reference section plus its trailer at the
/// start of `input`.
pub fn xref_and_trailer(input: &[u8]) -> crate::Result<(Xref, Dictionary)> {
    let span = LocatedSpan::new(input);
    let (i, mut xref) =
        xref_table(span).map_err(|_: nom::Err<NomError>| crate::XrefError::Malformed("unreadable table"))?;
    let (_, trailer) =
        trailer(i).map_err(|_: nom::Err<NomError>| crate::XrefError::Malformed("missing trailer dictionary"))?;

    xref.size = trailer
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| u64::try_from(size).ok())
        .unwrap_or_else(|| xref.max_id() + 1);

    Ok((xref, trailer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_span(s: &[u8]) -> ParserInput {
        LocatedSpan::new(s)
    }

    fn tstrip<O>(r: NomResult<O>) -> Option<O> {
        r.ok().and_then(|(i, o)| if !i.is_empty() { None } else { Some(o) })
    }

    #[test]
    fn parse_real_number() {
        let real = |i| tstrip(real(i));

        assert_eq!(real(test_span(b"0.12")), Some(0.12));
        assert_eq!(real(test_span(b"-.12")), Some(-0.12));
        assert_eq!(real(test_span(b"10.")), Some(10.0));
    }

    #[test]
    fn parse_string() {
        let literal_string = |i| tstrip(literal_string(i));

        let data = vec![
            ("()", ""),
            ("(text())", "text()"),
            ("(text\r\n\\\\(nested\\t\\b\\f))", "text\r\n\\(nested\t\x08\x0C)"),
            ("(text\\0\\53\\053\\0053)", "text\0++\x053"),
            ("(text line\\\n())", "text line()"),
        ];

        for (input, expected) in data {
            assert_eq!(
                literal_string(test_span(input.as_bytes())),
                Some(expected.as_bytes().to_vec()),
                "input: {input:?} output: {expected:?}",
            );
        }
    }

    #[test]
    fn parse_name() {
        let (text, expected) = (b"/ABC#5f", b"ABC\x5F");
        let result = tstrip(name(test_span(text)));
        assert_eq!(result, Some(expected.to_vec()));

        let (text, expected) = (b"/#cb#ce#cc#e5", b"\xcb\xce\xcc\xe5");
        let result = tstrip(name(test_span(text)));
        assert_eq!(result, Some(expected.to_vec()));
    }

    #[test]
    fn hex_partial_byte_is_padded() {
        let out = tstrip(hexadecimal_string(test_span(b"<901FA>")));

        match out {
            Some(Object::String(s, _)) => assert_eq!(s, b"\x90\x1F\xA0".to_vec()),
            _ => panic!("unexpected {out:?}"),
        }
    }

    #[test]
    fn hex_separated() {
        let out = tstrip(hexadecimal_string(test_span(b"<9 01F A>")));

        match out {
            Some(Object::String(s, _)) => assert_eq!(s, b"\x90\x1F\xA0".to_vec()),
            _ => panic!("unexpected {out:?}"),
        }
    }

    #[test]
    fn parse_indirect_with_reference() {
        let data = b"7 0 obj\n<< /Pages 2 0 R /Kind [3 1 R] >>\nendobj\n";
        let (id, object) = indirect_object(data, 0, None).unwrap();
        assert_eq!(id, (7, 0));
        let dict = object.as_dict().unwrap();
        assert_eq!(dict.get(b"Pages").unwrap().as_reference().unwrap(), (2, 0));
    }

    #[test]
    fn indirect_object_id_mismatch() {
        let data = b"7 0 obj\n42\nendobj\n";
        match indirect_object(data, 0, Some((8, 0))) {
            Err(Error::ObjectMismatch { expected, found, .. }) => {
                assert_eq!(expected, (8, 0));
                assert_eq!(found, (7, 0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stream_payload_is_deferred() {
        let data = b"5 0 obj\n<< /Length 4 >>\nstream\nABCD\nendstream\nendobj\n";
        let (id, object) = indirect_object(data, 0, None).unwrap();
        assert_eq!(id, (5, 0));
        let stream = object.as_stream().unwrap();
        assert!(!stream.is_materialized());
        assert_eq!(stream.start_position, Some(31));
        assert_eq!(&data[31..35], b"ABCD");
    }

    #[test]
    fn object_header_requires_boundary() {
        assert_eq!(object_header(b"12 0 obj\n<<>>"), Some((12, 0)));
        assert_eq!(object_header(b"12 0 obj"), Some((12, 0)));
        assert_eq!(object_header(b"12 0 objx"), None);
        assert_eq!(object_header(b"12 obj"), None);
    }

    #[test]
    fn header_tolerates_one_junk_line() {
        assert_eq!(header(b"%PDF-1.7\n"), Some("1.7".to_string()));
        assert_eq!(header(b"%FDF-1.2\n"), Some("1.2".to_string()));
        assert_eq!(header(b"\xef\xbb\xbf garbage\n%PDF-1.4\n"), Some("1.4".to_string()));
        assert_eq!(header(b"junk\njunk\n%PDF-1.4\n"), None);
    }

    #[test]
    fn parse_xref_table_with_free_entries() {
        let input = b"xref
0 3
0000000000 65535 f
0000000009 00000 n
0000000100 00002 n
trailer
<< /Size 3 /Root 1 0 R >>
";
        let (xref, trailer) = xref_and_trailer(input).unwrap();
        assert_eq!(xref.size, 3);
        assert_eq!(xref.get((1, 0)), Some(&XrefEntry::Normal { offset: 9 }));
        assert_eq!(xref.get((2, 2)), Some(&XrefEntry::Normal { offset: 100 }));
        assert!(matches!(xref.get((0, 65535)), Some(XrefEntry::Free { .. })));
        assert_eq!(trailer.get(b"Root").unwrap().as_reference().unwrap(), (1, 0));
    }

    #[test]
    fn xref_table_entry_count_must_match() {
        let input = b"xref
0 3
0000000000 65535 f
0000000009 00000 n
trailer
<< /Size 3 >>
";
        assert!(xref_and_trailer(input).is_err());
    }
}
