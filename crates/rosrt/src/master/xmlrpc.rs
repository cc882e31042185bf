// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML-RPC client for a remote master.
//!
//! The master speaks classic XML-RPC over HTTP POST. Every call returns a
//! `[code, status, value]` triple; code 1 is success. Transport failures
//! are retried until the configured overall timeout elapses (-1 retries
//! indefinitely).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::master::{GraphEvents, Master};
use crate::msg::TypeDescriptor;
use crate::param::ParamValue;

const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// An XML-RPC value as used by the master API.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlValue {
    Int(i32),
    Bool(bool),
    Double(f64),
    Str(String),
    Array(Vec<XmlValue>),
}

impl XmlValue {
    fn write_xml(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            XmlValue::Int(v) => {
                out.push_str(&format!("<i4>{}</i4>", v));
            }
            XmlValue::Bool(v) => {
                out.push_str(&format!("<boolean>{}</boolean>", i32::from(*v)));
            }
            XmlValue::Double(v) => {
                out.push_str(&format!("<double>{}</double>", v));
            }
            XmlValue::Str(v) => {
                out.push_str("<string>");
                for c in v.chars() {
                    match c {
                        '<' => out.push_str("&lt;"),
                        '>' => out.push_str("&gt;"),
                        '&' => out.push_str("&amp;"),
                        c => out.push(c),
                    }
                }
                out.push_str("</string>");
            }
            XmlValue::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write_xml(out);
                }
                out.push_str("</data></array>");
            }
        }
        out.push_str("</value>");
    }

    fn parse(node: roxmltree::Node<'_, '_>) -> Result<XmlValue> {
        debug_assert!(node.has_tag_name("value"));
        let Some(child) = node.first_element_child() else {
            // A bare <value>text</value> is a string per the XML-RPC spec.
            return Ok(XmlValue::Str(node.text().unwrap_or("").to_string()));
        };
        let text = || child.text().unwrap_or("");
        match child.tag_name().name() {
            "i4" | "int" => text()
                .trim()
                .parse::<i32>()
                .map(XmlValue::Int)
                .map_err(|e| Error::MasterUnreachable(format!("bad int in response: {}", e))),
            "boolean" => Ok(XmlValue::Bool(text().trim() == "1")),
            "double" => text()
                .trim()
                .parse::<f64>()
                .map(XmlValue::Double)
                .map_err(|e| Error::MasterUnreachable(format!("bad double in response: {}", e))),
            "string" => Ok(XmlValue::Str(text().to_string())),
            "array" => {
                let mut items = Vec::new();
                if let Some(data) = child
                    .children()
                    .find(|n| n.is_element() && n.has_tag_name("data"))
                {
                    for value in data.children().filter(|n| n.is_element()) {
                        items.push(XmlValue::parse(value)?);
                    }
                }
                Ok(XmlValue::Array(items))
            }
            other => Err(Error::MasterUnreachable(format!(
                "unsupported XML-RPC type '{}'",
                other
            ))),
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            XmlValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&ParamValue> for XmlValue {
    fn from(v: &ParamValue) -> Self {
        match v {
            ParamValue::Bool(b) => XmlValue::Bool(*b),
            ParamValue::Int(i) => XmlValue::Int(*i),
            ParamValue::Double(d) => XmlValue::Double(*d),
            ParamValue::Str(s) => XmlValue::Str(s.clone()),
        }
    }
}

impl TryFrom<&XmlValue> for ParamValue {
    type Error = Error;

    fn try_from(v: &XmlValue) -> Result<ParamValue> {
        match v {
            XmlValue::Bool(b) => Ok(ParamValue::Bool(*b)),
            XmlValue::Int(i) => Ok(ParamValue::Int(*i)),
            XmlValue::Double(d) => Ok(ParamValue::Double(*d)),
            XmlValue::Str(s) => Ok(ParamValue::Str(s.clone())),
            XmlValue::Array(_) => Err(Error::MasterUnreachable(
                "array parameters are not supported".to_string(),
            )),
        }
    }
}

/// Master client over XML-RPC.
pub struct XmlRpcMaster {
    endpoint: String,
    client: reqwest::blocking::Client,
    retry_timeout_ms: AtomicI64,
}

impl XmlRpcMaster {
    /// Create a client for the master at `endpoint` (e.g.
    /// `http://localhost:11311`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::blocking::Client::new(),
            retry_timeout_ms: AtomicI64::new(-1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post_once(&self, body: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "text/xml")
            .body(body.to_string())
            .send()
            .map_err(|e| Error::MasterUnreachable(e.to_string()))?;
        response
            .text()
            .map_err(|e| Error::MasterUnreachable(e.to_string()))
    }

    /// Issue one XML-RPC call, retrying transport failures within the
    /// configured overall timeout.
    fn call(&self, method: &str, params: &[XmlValue]) -> Result<XmlValue> {
        let mut body = String::with_capacity(256);
        body.push_str("<?xml version=\"1.0\"?><methodCall><methodName>");
        body.push_str(method);
        body.push_str("</methodName><params>");
        for param in params {
            body.push_str("<param>");
            param.write_xml(&mut body);
            body.push_str("</param>");
        }
        body.push_str("</params></methodCall>");

        let deadline = match self.retry_timeout_ms.load(Ordering::Relaxed) {
            -1 => None,
            ms => Some(Instant::now() + Duration::from_millis(ms.max(0) as u64)),
        };

        let text = loop {
            match self.post_once(&body) {
                Ok(text) => break text,
                Err(err) => {
                    let expired = deadline.is_some_and(|d| Instant::now() >= d);
                    if expired {
                        return Err(err);
                    }
                    log::warn!("master call {} failed ({}), retrying", method, err);
                    std::thread::sleep(RETRY_INTERVAL);
                }
            }
        };

        let doc = roxmltree::Document::parse(&text)
            .map_err(|e| Error::MasterUnreachable(format!("malformed response: {}", e)))?;
        let value = doc
            .descendants()
            .find(|n| n.has_tag_name("param"))
            .and_then(|p| p.children().find(|n| n.has_tag_name("value")))
            .ok_or_else(|| Error::MasterUnreachable("response carries no value".to_string()))?;
        let triple = XmlValue::parse(value)?;

        // Master responses are [code, statusMessage, value].
        let XmlValue::Array(items) = triple else {
            return Err(Error::MasterUnreachable(
                "response is not a status triple".to_string(),
            ));
        };
        let code = match items.first() {
            Some(XmlValue::Int(code)) => *code,
            _ => {
                return Err(Error::MasterUnreachable(
                    "response status code missing".to_string(),
                ))
            }
        };
        if code != 1 {
            let status = items
                .get(1)
                .and_then(XmlValue::as_str)
                .unwrap_or("unknown failure");
            // The master was reachable but refused the call; callers map
            // this per operation (missing parameter, no provider, ...).
            return Err(Error::InvalidState(format!("{}: {}", method, status)));
        }
        Ok(items.into_iter().nth(2).unwrap_or(XmlValue::Int(0)))
    }
}

impl Master for XmlRpcMaster {
    fn register_publisher(
        &self,
        caller_id: &str,
        topic: &str,
        ty: &TypeDescriptor,
        caller_uri: &str,
    ) -> Result<()> {
        self.call(
            "registerPublisher",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(topic.to_string()),
                XmlValue::Str(ty.name.clone()),
                XmlValue::Str(caller_uri.to_string()),
            ],
        )
        .map(|_| ())
    }

    fn unregister_publisher(&self, caller_id: &str, topic: &str, caller_uri: &str) -> Result<()> {
        self.call(
            "unregisterPublisher",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(topic.to_string()),
                XmlValue::Str(caller_uri.to_string()),
            ],
        )
        .map(|_| ())
    }

    fn register_subscriber(
        &self,
        caller_id: &str,
        topic: &str,
        ty: &TypeDescriptor,
        caller_uri: &str,
    ) -> Result<Vec<String>> {
        let value = self.call(
            "registerSubscriber",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(topic.to_string()),
                XmlValue::Str(ty.name.clone()),
                XmlValue::Str(caller_uri.to_string()),
            ],
        )?;
        let XmlValue::Array(items) = value else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    fn unregister_subscriber(&self, caller_id: &str, topic: &str, caller_uri: &str) -> Result<()> {
        self.call(
            "unregisterSubscriber",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(topic.to_string()),
                XmlValue::Str(caller_uri.to_string()),
            ],
        )
        .map(|_| ())
    }

    fn register_service(
        &self,
        caller_id: &str,
        service: &str,
        service_uri: &str,
        caller_uri: &str,
    ) -> Result<()> {
        self.call(
            "registerService",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(service.to_string()),
                XmlValue::Str(service_uri.to_string()),
                XmlValue::Str(caller_uri.to_string()),
            ],
        )
        .map(|_| ())
    }

    fn unregister_service(&self, caller_id: &str, service: &str, service_uri: &str) -> Result<()> {
        self.call(
            "unregisterService",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(service.to_string()),
                XmlValue::Str(service_uri.to_string()),
            ],
        )
        .map(|_| ())
    }

    fn lookup_service(&self, caller_id: &str, service: &str) -> Result<String> {
        let value = self.call(
            "lookupService",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(service.to_string()),
            ],
        );
        match value {
            Ok(XmlValue::Str(uri)) if !uri.is_empty() => Ok(uri),
            Ok(_) => Err(Error::ServiceUnavailable(service.to_string())),
            // The master answers "no provider" with a non-success code.
            Err(Error::InvalidState(_)) => Err(Error::ServiceUnavailable(service.to_string())),
            Err(e) => Err(e),
        }
    }

    fn get_published_topics(&self, caller_id: &str) -> Result<Vec<(String, String)>> {
        let value = self.call(
            "getPublishedTopics",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(String::new()),
            ],
        )?;
        let mut topics = Vec::new();
        if let XmlValue::Array(items) = value {
            for item in items {
                if let XmlValue::Array(pair) = item {
                    if let (Some(topic), Some(ty)) = (
                        pair.first().and_then(XmlValue::as_str),
                        pair.get(1).and_then(XmlValue::as_str),
                    ) {
                        topics.push((topic.to_string(), ty.to_string()));
                    }
                }
            }
        }
        Ok(topics)
    }

    fn set_param(&self, caller_id: &str, key: &str, value: &ParamValue) -> Result<()> {
        self.call(
            "setParam",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(key.to_string()),
                XmlValue::from(value),
            ],
        )
        .map(|_| ())
    }

    fn get_param(&self, caller_id: &str, key: &str) -> Result<Option<ParamValue>> {
        match self.call(
            "getParam",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(key.to_string()),
            ],
        ) {
            Ok(value) => Ok(Some(ParamValue::try_from(&value)?)),
            Err(Error::InvalidState(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn has_param(&self, caller_id: &str, key: &str) -> Result<bool> {
        let value = self.call(
            "hasParam",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(key.to_string()),
            ],
        )?;
        Ok(matches!(value, XmlValue::Bool(true)))
    }

    fn delete_param(&self, caller_id: &str, key: &str) -> Result<bool> {
        match self.call(
            "deleteParam",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(key.to_string()),
            ],
        ) {
            Ok(_) => Ok(true),
            Err(Error::InvalidState(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn subscribe_param(
        &self,
        caller_id: &str,
        callback_uri: &str,
        key: &str,
    ) -> Result<Option<ParamValue>> {
        match self.call(
            "subscribeParam",
            &[
                XmlValue::Str(caller_id.to_string()),
                XmlValue::Str(callback_uri.to_string()),
                XmlValue::Str(key.to_string()),
            ],
        ) {
            Ok(value) => Ok(ParamValue::try_from(&value).ok()),
            Err(Error::InvalidState(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn ping(&self) -> Result<()> {
        self.call("getUri", &[XmlValue::Str("/rosrt".to_string())])
            .map(|_| ())
    }

    fn attach_events(&self, _caller_uri: &str, _events: Weak<dyn GraphEvents>) {
        // Out-of-band updates from a remote master arrive at the node's own
        // RPC endpoint, which is outside this crate.
    }

    fn set_retry_timeout_ms(&self, timeout_ms: i64) {
        self.retry_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_value(xml: &str) -> XmlValue {
        let doc = roxmltree::Document::parse(xml).unwrap();
        XmlValue::parse(doc.root_element()).unwrap()
    }

    #[test]
    fn scalar_values_roundtrip_through_xml() {
        let mut out = String::new();
        XmlValue::Array(vec![
            XmlValue::Int(1),
            XmlValue::Str("ready".to_string()),
            XmlValue::Bool(true),
            XmlValue::Double(2.5),
        ])
        .write_xml(&mut out);

        let back = parse_value(&out);
        assert_eq!(
            back,
            XmlValue::Array(vec![
                XmlValue::Int(1),
                XmlValue::Str("ready".to_string()),
                XmlValue::Bool(true),
                XmlValue::Double(2.5),
            ])
        );
    }

    #[test]
    fn bare_value_text_parses_as_string() {
        assert_eq!(
            parse_value("<value>plain</value>"),
            XmlValue::Str("plain".to_string())
        );
    }

    #[test]
    fn strings_are_escaped() {
        let mut out = String::new();
        XmlValue::Str("a<b&c".to_string()).write_xml(&mut out);
        assert!(out.contains("a&lt;b&amp;c"));
        assert_eq!(parse_value(&out), XmlValue::Str("a<b&c".to_string()));
    }

    #[test]
    fn param_value_conversion() {
        let xml = XmlValue::from(&ParamValue::Double(1.25));
        assert_eq!(ParamValue::try_from(&xml).unwrap(), ParamValue::Double(1.25));
        assert!(ParamValue::try_from(&XmlValue::Array(vec![])).is_err());
    }
}
