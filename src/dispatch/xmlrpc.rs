//! Minimal XML-RPC client.
//!
//! Covers what talking to a LAVA scheduler needs: encoding a method call
//! with scalar, array and struct parameters, decoding a `methodResponse`
//! (including faults), and POSTing it with basic authentication.
//!
//! ```text
//! <methodCall>                         <methodResponse>
//!   <methodName>m</methodName>           <params><param>
//!   <params>                               <value><int>42</int></value>
//!     <param><value>..</value></param>   </param></params>
//!   </params>                          </methodResponse>
//! </methodCall>
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;

/// Errors from an XML-RPC exchange.
#[derive(Debug, thiserror::Error)]
pub enum XmlRpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Http(reqwest::StatusCode),

    /// The server answered with a `<fault>`.
    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("malformed XML-RPC document: {0}")]
    Malformed(String),
}

type XmlRpcResult<T> = Result<T, XmlRpcError>;

/// An XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Looks up a struct member.
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(name),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> XmlRpcResult<()> {
    writer
        .write_event(event)
        .map_err(|e| XmlRpcError::Malformed(e.to_string()))
}

fn emit_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> XmlRpcResult<()> {
    emit(writer, Event::Start(BytesStart::new(tag)))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(tag)))
}

fn emit_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> XmlRpcResult<()> {
    emit(writer, Event::Start(BytesStart::new("value")))?;
    match value {
        Value::Int(i) => emit_text_element(writer, "int", &i.to_string())?,
        Value::Bool(b) => emit_text_element(writer, "boolean", if *b { "1" } else { "0" })?,
        Value::String(s) => emit_text_element(writer, "string", s)?,
        Value::Double(d) => emit_text_element(writer, "double", &d.to_string())?,
        Value::Nil => emit(writer, Event::Empty(BytesStart::new("nil")))?,
        Value::Array(items) => {
            emit(writer, Event::Start(BytesStart::new("array")))?;
            emit(writer, Event::Start(BytesStart::new("data")))?;
            for item in items {
                emit_value(writer, item)?;
            }
            emit(writer, Event::End(BytesEnd::new("data")))?;
            emit(writer, Event::End(BytesEnd::new("array")))?;
        }
        Value::Struct(members) => {
            emit(writer, Event::Start(BytesStart::new("struct")))?;
            for (name, member) in members {
                emit(writer, Event::Start(BytesStart::new("member")))?;
                emit_text_element(writer, "name", name)?;
                emit_value(writer, member)?;
                emit(writer, Event::End(BytesEnd::new("member")))?;
            }
            emit(writer, Event::End(BytesEnd::new("struct")))?;
        }
    }
    emit(writer, Event::End(BytesEnd::new("value")))
}

/// Encodes a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> XmlRpcResult<String> {
    let mut writer = Writer::new(Vec::new());

    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    emit(&mut writer, Event::Start(BytesStart::new("methodCall")))?;
    emit_text_element(&mut writer, "methodName", method)?;
    emit(&mut writer, Event::Start(BytesStart::new("params")))?;
    for param in params {
        emit(&mut writer, Event::Start(BytesStart::new("param")))?;
        emit_value(&mut writer, param)?;
        emit(&mut writer, Event::End(BytesEnd::new("param")))?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("params")))?;
    emit(&mut writer, Event::End(BytesEnd::new("methodCall")))?;

    String::from_utf8(writer.into_inner()).map_err(|e| XmlRpcError::Malformed(e.to_string()))
}

// ============================================================================
// Decoding
// ============================================================================

#[derive(Debug, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Empty(String),
    Text(String),
}

fn tokenize(body: &str) -> XmlRpcResult<Vec<Token>> {
    let mut reader = Reader::from_str(body);
    let mut tokens = Vec::new();
    let malformed = |e: quick_xml::Error| XmlRpcError::Malformed(e.to_string());

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                tokens.push(Token::Open(String::from_utf8_lossy(e.name().as_ref()).into_owned()))
            }
            Event::End(e) => {
                tokens.push(Token::Close(String::from_utf8_lossy(e.name().as_ref()).into_owned()))
            }
            Event::Empty(e) => {
                tokens.push(Token::Empty(String::from_utf8_lossy(e.name().as_ref()).into_owned()))
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(malformed)?;
                if !text.trim().is_empty() {
                    tokens.push(Token::Text(text.into_owned()));
                }
            }
            Event::CData(e) => {
                tokens.push(Token::Text(String::from_utf8_lossy(&e.into_inner()).into_owned()))
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> XmlRpcResult<&Token> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| XmlRpcError::Malformed("unexpected end of document".to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect_open(&mut self, tag: &str) -> XmlRpcResult<()> {
        match self.next()? {
            Token::Open(t) if t == tag => Ok(()),
            other => Err(XmlRpcError::Malformed(format!(
                "expected <{}>, found {:?}",
                tag, other
            ))),
        }
    }

    fn expect_close(&mut self, tag: &str) -> XmlRpcResult<()> {
        match self.next()? {
            Token::Close(t) if t == tag => Ok(()),
            other => Err(XmlRpcError::Malformed(format!(
                "expected </{}>, found {:?}",
                tag, other
            ))),
        }
    }

    /// Reads optional text followed by `</tag>`.
    fn text_until_close(&mut self, tag: &str) -> XmlRpcResult<String> {
        let text = match self.peek() {
            Some(Token::Text(t)) => {
                let t = t.clone();
                self.pos += 1;
                t
            }
            _ => String::new(),
        };
        self.expect_close(tag)?;
        Ok(text)
    }

    fn value(&mut self) -> XmlRpcResult<Value> {
        match self.next()? {
            Token::Empty(t) if t == "value" => return Ok(Value::String(String::new())),
            Token::Open(t) if t == "value" => {}
            other => {
                return Err(XmlRpcError::Malformed(format!(
                    "expected <value>, found {:?}",
                    other
                )));
            }
        }

        let value = match self.next()? {
            // Untyped values are strings.
            Token::Text(t) => {
                let value = Value::String(t.clone());
                self.expect_close("value")?;
                return Ok(value);
            }
            Token::Close(t) if t == "value" => return Ok(Value::String(String::new())),
            Token::Empty(t) => match t.as_str() {
                "nil" => Value::Nil,
                "array" => Value::Array(Vec::new()),
                "struct" => Value::Struct(BTreeMap::new()),
                _ => Value::String(String::new()),
            },
            Token::Open(t) => {
                let tag = t.clone();
                self.typed(&tag)?
            }
            Token::Close(t) => {
                return Err(XmlRpcError::Malformed(format!("unexpected </{}>", t)));
            }
        };

        self.expect_close("value")?;
        Ok(value)
    }

    fn typed(&mut self, tag: &str) -> XmlRpcResult<Value> {
        match tag {
            "int" | "i4" | "i8" => {
                let text = self.text_until_close(tag)?;
                text.trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|e| XmlRpcError::Malformed(format!("bad <{}> '{}': {}", tag, text, e)))
            }
            "double" => {
                let text = self.text_until_close(tag)?;
                text.trim()
                    .parse()
                    .map(Value::Double)
                    .map_err(|e| XmlRpcError::Malformed(format!("bad <double> '{}': {}", text, e)))
            }
            "boolean" => match self.text_until_close(tag)?.trim() {
                "1" => Ok(Value::Bool(true)),
                "0" => Ok(Value::Bool(false)),
                other => Err(XmlRpcError::Malformed(format!("bad <boolean> '{}'", other))),
            },
            "nil" => {
                self.expect_close("nil")?;
                Ok(Value::Nil)
            }
            "array" => {
                let mut items = Vec::new();
                match self.next()? {
                    Token::Empty(t) if t == "data" => {}
                    Token::Open(t) if t == "data" => {
                        while matches!(self.peek(), Some(Token::Open(t) | Token::Empty(t)) if t == "value")
                        {
                            items.push(self.value()?);
                        }
                        self.expect_close("data")?;
                    }
                    other => {
                        return Err(XmlRpcError::Malformed(format!(
                            "expected <data>, found {:?}",
                            other
                        )));
                    }
                }
                self.expect_close("array")?;
                Ok(Value::Array(items))
            }
            "struct" => {
                let mut members = BTreeMap::new();
                while matches!(self.peek(), Some(Token::Open(t)) if t == "member") {
                    self.pos += 1;
                    self.expect_open("name")?;
                    let name = self.text_until_close("name")?;
                    let value = self.value()?;
                    self.expect_close("member")?;
                    members.insert(name, value);
                }
                self.expect_close("struct")?;
                Ok(Value::Struct(members))
            }
            // string, dateTime.iso8601, base64 and unknown scalar types
            _ => Ok(Value::String(self.text_until_close(tag)?)),
        }
    }
}

/// Decodes a `methodResponse` document into its single return value.
pub fn decode_response(body: &str) -> XmlRpcResult<Value> {
    let mut parser = Parser {
        tokens: tokenize(body)?,
        pos: 0,
    };

    parser.expect_open("methodResponse")?;
    match parser.next()? {
        Token::Open(t) if t == "params" => {
            parser.expect_open("param")?;
            let value = parser.value()?;
            parser.expect_close("param")?;
            parser.expect_close("params")?;
            Ok(value)
        }
        Token::Open(t) if t == "fault" => {
            let fault = parser.value()?;
            let code = match fault.member("faultCode") {
                Some(Value::Int(code)) => *code,
                _ => 0,
            };
            let message = fault
                .member("faultString")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Err(XmlRpcError::Fault { code, message })
        }
        other => Err(XmlRpcError::Malformed(format!(
            "expected <params> or <fault>, found {:?}",
            other
        ))),
    }
}

// ============================================================================
// Transport
// ============================================================================

/// XML-RPC client for a single endpoint.
pub struct XmlRpcClient {
    http: reqwest::Client,
    endpoint: Url,
    username: String,
    token: String,
}

impl XmlRpcClient {
    pub fn new(
        endpoint: Url,
        username: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> XmlRpcResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lablaunch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| XmlRpcError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            username: username.into(),
            token: token.into(),
        })
    }

    /// Invokes `method` and returns its decoded result.
    pub async fn call(&self, method: &str, params: &[Value]) -> XmlRpcResult<Value> {
        let body = encode_call(method, params)?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .basic_auth(&self.username, Some(&self.token))
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| XmlRpcError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(XmlRpcError::Http(status));
        }

        let text = response
            .text()
            .await
            .map_err(|e| XmlRpcError::Transport(e.to_string()))?;
        decode_response(&text)
    }
}
