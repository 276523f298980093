//! Parser for the `--set` family of value overrides.
//!
//! The syntax is a comma separated list of `key=value` pairs. Keys are dotted
//! paths which can address list positions using `[index]`, values can be
//! lists written as `{a,b,c}`. A backslash escapes the following character.
//!
//! ```text
//! image.tag=1.27,ingress.hosts[0].name=example.com,args={--verbose,--color}
//! ```
use std::num::ParseIntError;

use serde_json::{Map, Number, Value};
use snafu::{ResultExt, Snafu, ensure};

use crate::values::{Document, Getters, ReadError};

/// The largest list index that can be set, larger indices would allocate
/// unreasonably large lists.
const MAX_INDEX: usize = 65536;

/// The maximum number of segments (keys and list indices) of a single key.
pub(crate) const MAX_NESTING: usize = 30;

#[derive(Debug, Snafu)]
pub enum ParseError {
    #[snafu(display("key {key:?} has no value"))]
    MissingValue { key: String },

    #[snafu(display("key in {input:?} is empty"))]
    EmptyKey { input: String },

    #[snafu(display("failed to parse list index {index:?} of key {key:?}"))]
    InvalidIndex {
        source: ParseIntError,
        index: String,
        key: String,
    },

    #[snafu(display("list index {index} of key {key:?} is larger than the maximum of {MAX_INDEX}"))]
    IndexTooLarge { index: usize, key: String },

    #[snafu(display("key {key:?} is nested deeper than the maximum of {MAX_NESTING} levels"))]
    NestingTooDeep { key: String },

    #[snafu(display("list index of key {key:?} is not terminated by ']'"))]
    UnterminatedIndex { key: String },

    #[snafu(display("unexpected character {found:?} in key {key:?}"))]
    UnexpectedCharacter { found: char, key: String },

    #[snafu(display("list value of key {key:?} is not terminated by '}}'"))]
    UnterminatedList { key: String },

    #[snafu(display("failed to parse JSON value of key {key:?}"))]
    ParseJson {
        source: serde_json::Error,
        key: String,
    },

    #[snafu(display("failed to read file {path:?} for key {key:?}"))]
    ReadFile {
        source: ReadError,
        path: String,
        key: String,
    },

    #[snafu(display("file {path:?} for key {key:?} is not valid UTF-8"))]
    InvalidFileContent {
        source: std::string::FromUtf8Error,
        path: String,
        key: String,
    },
}

/// How the values of `key=value` pairs are interpreted.
#[derive(Clone, Copy)]
pub enum ValueMode<'a> {
    /// Infer booleans, `null` and integers, everything else is a string (`--set`).
    Typed,

    /// Every value is a string (`--set-string`).
    String,

    /// Every value is a JSON document (`--set-json`).
    Json,

    /// Every value names a file whose content becomes the value (`--set-file`).
    File(&'a Getters),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Parses `input` and sets all contained values in `dest`.
///
/// Existing values in `dest` are overwritten, intermediate values which are
/// not maps (or lists, when indexing) are replaced.
pub fn parse_into(input: &str, dest: &mut Document, mode: ValueMode<'_>) -> Result<(), ParseError> {
    let mut parser = Parser::new(input, mode);

    while !parser.at_end() {
        let segments = parser.key_path()?;
        let value = parser.value(&segments)?;
        set_path(dest, &segments, value);
    }

    Ok(())
}

struct Parser<'a> {
    input: Vec<char>,
    position: usize,
    mode: ValueMode<'a>,
}

impl<'a> Parser<'a> {
    fn new(input: &str, mode: ValueMode<'a>) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            mode,
        }
    }

    fn at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    /// Reads until one of the unescaped `stops` and consumes it.
    fn read_until(&mut self, stops: &[char]) -> (String, Option<char>) {
        let mut read = String::new();

        while let Some(current) = self.peek() {
            self.position += 1;

            if current == '\\' {
                if let Some(escaped) = self.peek() {
                    self.position += 1;
                    read.push(escaped);
                }
                continue;
            }

            if stops.contains(&current) {
                return (read, Some(current));
            }
            read.push(current);
        }

        (read, None)
    }

    fn key_path(&mut self) -> Result<Vec<Segment>, ParseError> {
        let start = self.position;
        let mut segments = Vec::new();

        loop {
            ensure!(
                segments.len() < MAX_NESTING,
                NestingTooDeepSnafu {
                    key: self.consumed_since(start),
                }
            );

            let (name, stop) = self.read_until(&['=', '.', '[', ',']);
            match stop {
                Some('=') => {
                    if name.is_empty() {
                        ensure!(
                            matches!(segments.last(), Some(Segment::Index(_))),
                            EmptyKeySnafu {
                                input: self.consumed_since(start),
                            }
                        );
                    } else {
                        segments.push(Segment::Key(name));
                    }
                    return Ok(segments);
                }
                Some('.') => {
                    ensure!(
                        !name.is_empty(),
                        EmptyKeySnafu {
                            input: self.consumed_since(start),
                        }
                    );
                    segments.push(Segment::Key(name));
                }
                Some('[') => {
                    if name.is_empty() {
                        ensure!(
                            !segments.is_empty(),
                            EmptyKeySnafu {
                                input: self.consumed_since(start),
                            }
                        );
                    } else {
                        segments.push(Segment::Key(name));
                    }
                    segments.push(Segment::Index(self.index(start)?));

                    match self.peek() {
                        Some('=') => {
                            self.position += 1;
                            return Ok(segments);
                        }
                        Some('.') => self.position += 1,
                        Some('[') => {}
                        Some(found) => {
                            return UnexpectedCharacterSnafu {
                                found,
                                key: self.consumed_since(start),
                            }
                            .fail();
                        }
                        None => {
                            return MissingValueSnafu {
                                key: self.consumed_since(start),
                            }
                            .fail();
                        }
                    }
                }
                _ => {
                    return MissingValueSnafu {
                        key: self.consumed_since(start),
                    }
                    .fail();
                }
            }
        }
    }

    /// Reads a list index, the key so far (starting at `key_start`) is only
    /// used for errors.
    fn index(&mut self, key_start: usize) -> Result<usize, ParseError> {
        let (index, stop) = self.read_until(&[']']);
        ensure!(
            stop.is_some(),
            UnterminatedIndexSnafu {
                key: self.consumed_since(key_start),
            }
        );

        let index = match index.trim().parse::<usize>() {
            Ok(index) => index,
            Err(err) => {
                return Err(err).context(InvalidIndexSnafu {
                    key: self.consumed_since(key_start),
                    index,
                });
            }
        };
        ensure!(
            index <= MAX_INDEX,
            IndexTooLargeSnafu {
                index,
                key: self.consumed_since(key_start),
            }
        );

        Ok(index)
    }

    fn value(&mut self, segments: &[Segment]) -> Result<Value, ParseError> {
        let key = display_key(segments);

        match self.mode {
            ValueMode::Json => self.json_value(key),
            ValueMode::File(getters) => {
                let (path, _) = self.read_until(&[',']);
                let content = getters.read(&path).context(ReadFileSnafu {
                    path: path.as_str(),
                    key: key.as_str(),
                })?;
                let content =
                    String::from_utf8(content).context(InvalidFileContentSnafu { path, key })?;
                Ok(Value::String(content))
            }
            ValueMode::Typed | ValueMode::String if self.peek() == Some('{') => {
                self.position += 1;
                self.list_value(key)
            }
            ValueMode::Typed => {
                let (raw, _) = self.read_until(&[',']);
                Ok(typed_value(raw))
            }
            ValueMode::String => {
                let (raw, _) = self.read_until(&[',']);
                Ok(Value::String(raw))
            }
        }
    }

    fn list_value(&mut self, key: String) -> Result<Value, ParseError> {
        let mut items = Vec::new();

        loop {
            let (raw, stop) = self.read_until(&[',', '}']);
            match stop {
                Some(',') => items.push(self.scalar(raw)),
                Some('}') => {
                    // `{}` is an empty list, not a list with an empty string
                    if !(raw.is_empty() && items.is_empty()) {
                        items.push(self.scalar(raw));
                    }
                    break;
                }
                _ => return UnterminatedListSnafu { key }.fail(),
            }
        }

        match self.peek() {
            None => {}
            Some(',') => self.position += 1,
            Some(found) => return UnexpectedCharacterSnafu { found, key }.fail(),
        }

        Ok(Value::Array(items))
    }

    fn json_value(&mut self, key: String) -> Result<Value, ParseError> {
        let rest = self.input[self.position..].iter().collect::<String>();
        let mut stream = serde_json::Deserializer::from_str(&rest).into_iter::<Value>();

        let value = match stream.next() {
            Some(value) => value.context(ParseJsonSnafu { key: key.as_str() })?,
            None => Value::Null,
        };
        self.position += rest[..stream.byte_offset()].chars().count();

        while self.peek().is_some_and(char::is_whitespace) {
            self.position += 1;
        }
        match self.peek() {
            None => {}
            Some(',') => self.position += 1,
            Some(found) => return UnexpectedCharacterSnafu { found, key }.fail(),
        }

        Ok(value)
    }

    fn scalar(&self, raw: String) -> Value {
        match self.mode {
            ValueMode::Typed => typed_value(raw),
            _ => Value::String(raw),
        }
    }

    fn consumed_since(&self, start: usize) -> String {
        self.input[start..self.position].iter().collect()
    }
}

/// Infers the type of a `--set` value.
///
/// `true`, `false` and `null` (case-insensitive) become booleans and null,
/// integers become numbers unless they have a leading zero (which keeps
/// values like `0755` or zip codes intact). Everything else is a string.
fn typed_value(raw: String) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if raw == "0" {
        return Value::Number(Number::from(0));
    }

    match raw.parse::<i64>() {
        Ok(number) if !raw.starts_with('0') => Value::Number(Number::from(number)),
        _ => Value::String(raw),
    }
}

fn display_key(segments: &[Segment]) -> String {
    let mut key = String::new();
    for segment in segments {
        match segment {
            Segment::Key(name) => {
                if !key.is_empty() {
                    key.push('.');
                }
                key.push_str(name);
            }
            Segment::Index(index) => key.push_str(&format!("[{index}]")),
        }
    }
    key
}

fn set_path(dest: &mut Document, segments: &[Segment], value: Value) {
    let Some((Segment::Key(key), rest)) = segments.split_first() else {
        return;
    };
    set_value(dest.entry(key.clone()).or_insert(Value::Null), rest, value);
}

fn set_value(slot: &mut Value, segments: &[Segment], value: Value) {
    let Some((segment, rest)) = segments.split_first() else {
        *slot = value;
        return;
    };

    match segment {
        Segment::Key(key) => {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(map) = slot {
                set_value(map.entry(key.clone()).or_insert(Value::Null), rest, value);
            }
        }
        Segment::Index(index) => {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(list) = slot {
                if list.len() <= *index {
                    list.resize(index + 1, Value::Null);
                }
                if let Some(item) = list.get_mut(*index) {
                    set_value(item, rest, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn parse(input: &str, mode: ValueMode<'_>) -> Result<Value, ParseError> {
        let mut dest = Document::new();
        parse_into(input, &mut dest, mode)?;
        Ok(Value::Object(dest))
    }

    #[rstest]
    #[case("name=value", json!({"name": "value"}))]
    #[case("a=b,c=d", json!({"a": "b", "c": "d"}))]
    #[case("a.b.c=d", json!({"a": {"b": {"c": "d"}}}))]
    #[case("a=", json!({"a": ""}))]
    #[case("a=b,", json!({"a": "b"}))]
    #[case("enabled=true,debug=FALSE,gone=null", json!({"enabled": true, "debug": false, "gone": null}))]
    #[case("replicas=3,zero=0,negative=-1", json!({"replicas": 3, "zero": 0, "negative": -1}))]
    #[case("mode=0755,version=1.27,big=99999999999999999999", json!({"mode": "0755", "version": "1.27", "big": "99999999999999999999"}))]
    #[case("list={a,b,3}", json!({"list": ["a", "b", 3]}))]
    #[case("list={},after=x", json!({"list": [], "after": "x"}))]
    #[case("hosts[0]=a,hosts[2]=c", json!({"hosts": ["a", null, "c"]}))]
    #[case("hosts[0].name=a,hosts[0].port=80", json!({"hosts": [{"name": "a", "port": 80}]}))]
    #[case("matrix[1][0]=x", json!({"matrix": [null, ["x"]]}))]
    #[case(r"csv=a\,b,dotted\.key=v", json!({"csv": "a,b", "dotted.key": "v"}))]
    #[case("a=1,a.b=2", json!({"a": {"b": 2}}))]
    fn typed_values(#[case] input: &str, #[case] expected: Value) {
        assert_eq!(parse(input, ValueMode::Typed).unwrap(), expected);
    }

    #[rstest]
    #[case("enabled=true,replicas=3", json!({"enabled": "true", "replicas": "3"}))]
    #[case("list={1,true}", json!({"list": ["1", "true"]}))]
    fn string_values(#[case] input: &str, #[case] expected: Value) {
        assert_eq!(parse(input, ValueMode::String).unwrap(), expected);
    }

    #[rstest]
    #[case(r#"a={"b": [1, 2]}"#, json!({"a": {"b": [1, 2]}}))]
    #[case(r#"a="text",b=3"#, json!({"a": "text", "b": 3}))]
    #[case(r#"list[1]={"name": "x"}"#, json!({"list": [null, {"name": "x"}]}))]
    fn json_values(#[case] input: &str, #[case] expected: Value) {
        assert_eq!(parse(input, ValueMode::Json).unwrap(), expected);
    }

    #[rstest]
    #[case("novalue")]
    #[case("a.b")]
    #[case("a,b=c")]
    fn missing_value(#[case] input: &str) {
        let err = parse(input, ValueMode::Typed).unwrap_err();
        assert!(matches!(err, ParseError::MissingValue { .. }), "{err}");
    }

    #[rstest]
    #[case("=value")]
    #[case("a..b=value")]
    #[case("[0]=value")]
    fn empty_key(#[case] input: &str) {
        let err = parse(input, ValueMode::Typed).unwrap_err();
        assert!(matches!(err, ParseError::EmptyKey { .. }), "{err}");
    }

    #[test]
    fn invalid_indices() {
        assert!(matches!(
            parse("a[x]=b", ValueMode::Typed).unwrap_err(),
            ParseError::InvalidIndex { .. }
        ));
        assert!(matches!(
            parse("a[65537]=b", ValueMode::Typed).unwrap_err(),
            ParseError::IndexTooLarge { index: 65537, .. }
        ));
        assert!(matches!(
            parse("a[1=b", ValueMode::Typed).unwrap_err(),
            ParseError::UnterminatedIndex { .. }
        ));
        assert!(matches!(
            parse("a[1]x=b", ValueMode::Typed).unwrap_err(),
            ParseError::UnexpectedCharacter { found: 'x', .. }
        ));
    }

    #[rstest]
    #[case::keys(30, true)]
    #[case::too_many_keys(31, false)]
    #[case::huge_key(200_000, false)]
    fn nesting_depth(#[case] depth: usize, #[case] accepted: bool) {
        let input = format!("{}leaf=1", "a.".repeat(depth - 1));

        match parse(&input, ValueMode::Typed) {
            Ok(_) => assert!(accepted, "key with depth {depth} must be rejected"),
            Err(err) => {
                assert!(!accepted, "{err}");
                assert!(matches!(err, ParseError::NestingTooDeep { .. }), "{err}");
            }
        }
    }

    #[test]
    fn nested_list_indices_count_as_nesting() {
        let input = format!("m{}=x", "[0]".repeat(MAX_NESTING));
        let err = parse(&input, ValueMode::Typed).unwrap_err();
        assert!(matches!(err, ParseError::NestingTooDeep { .. }), "{err}");
    }

    #[test]
    fn unterminated_list() {
        let err = parse("a={b,c", ValueMode::Typed).unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedList { .. }));
    }

    #[test]
    fn malformed_json() {
        let err = parse("a={broken", ValueMode::Json).unwrap_err();
        assert!(matches!(err, ParseError::ParseJson { .. }));
    }

    #[test]
    fn file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "line one\nline two").unwrap();
        let getters = Getters::default();

        let input = format!("config.script={}", file.path().display());
        let value = parse(&input, ValueMode::File(&getters)).unwrap();
        assert_eq!(value, json!({"config": {"script": "line one\nline two"}}));
    }

    #[test]
    fn missing_file() {
        let getters = Getters::default();
        let err = parse("a=/does/not/exist", ValueMode::File(&getters)).unwrap_err();
        assert!(matches!(err, ParseError::ReadFile { .. }));
    }
}
