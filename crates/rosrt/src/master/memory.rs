// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-local master for tests and single-process graphs.
//!
//! Keeps the full directory state in memory and records every registration
//! call so tests can assert how often the master was informed. Publisher
//! and parameter updates are pushed synchronously through attached
//! [`GraphEvents`] sinks.

use std::collections::HashMap;
use std::sync::Weak;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::master::{GraphEvents, Master};
use crate::msg::TypeDescriptor;
use crate::param::ParamValue;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    RegisterPublisher(String),
    UnregisterPublisher(String),
    RegisterSubscriber(String),
    UnregisterSubscriber(String),
    RegisterService(String),
    UnregisterService(String),
}

#[derive(Default)]
struct State {
    /// topic -> (type name, publisher URIs)
    publishers: HashMap<String, (String, Vec<String>)>,
    /// topic -> subscriber URIs
    subscribers: HashMap<String, Vec<String>>,
    /// service -> provider URI
    services: HashMap<String, String>,
    params: HashMap<String, ParamValue>,
    /// param key -> subscribed caller URIs
    param_subs: HashMap<String, Vec<String>>,
    events: HashMap<String, Weak<dyn GraphEvents>>,
    log: Vec<Call>,
}

/// In-memory directory service.
#[derive(Default)]
pub struct MemoryMaster {
    state: Mutex<State>,
}

impl MemoryMaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn count(&self, probe: &Call) -> usize {
        self.state.lock().log.iter().filter(|c| *c == probe).count()
    }

    /// How many times `registerPublisher` was called for `topic`.
    pub fn publisher_registrations(&self, topic: &str) -> usize {
        self.count(&Call::RegisterPublisher(topic.to_string()))
    }

    pub fn publisher_unregistrations(&self, topic: &str) -> usize {
        self.count(&Call::UnregisterPublisher(topic.to_string()))
    }

    pub fn subscriber_registrations(&self, topic: &str) -> usize {
        self.count(&Call::RegisterSubscriber(topic.to_string()))
    }

    pub fn subscriber_unregistrations(&self, topic: &str) -> usize {
        self.count(&Call::UnregisterSubscriber(topic.to_string()))
    }

    pub fn service_registrations(&self, service: &str) -> usize {
        self.count(&Call::RegisterService(service.to_string()))
    }

    pub fn service_unregistrations(&self, service: &str) -> usize {
        self.count(&Call::UnregisterService(service.to_string()))
    }

    /// Current publisher URIs for a topic.
    pub fn publishers_of(&self, topic: &str) -> Vec<String> {
        self.state
            .lock()
            .publishers
            .get(topic)
            .map(|(_, uris)| uris.clone())
            .unwrap_or_default()
    }

    fn notify_publisher_update(state: &State, topic: &str) {
        let uris = state
            .publishers
            .get(topic)
            .map(|(_, uris)| uris.clone())
            .unwrap_or_default();
        let Some(subscribers) = state.subscribers.get(topic) else {
            return;
        };
        for sub_uri in subscribers {
            if let Some(events) = state.events.get(sub_uri).and_then(Weak::upgrade) {
                events.publisher_update(topic, &uris);
            }
        }
    }
}

impl Master for MemoryMaster {
    fn register_publisher(
        &self,
        _caller_id: &str,
        topic: &str,
        ty: &TypeDescriptor,
        caller_uri: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(Call::RegisterPublisher(topic.to_string()));
        let entry = state
            .publishers
            .entry(topic.to_string())
            .or_insert_with(|| (ty.name.clone(), Vec::new()));
        if !entry.1.iter().any(|u| u == caller_uri) {
            entry.1.push(caller_uri.to_string());
        }
        Self::notify_publisher_update(&state, topic);
        Ok(())
    }

    fn unregister_publisher(&self, _caller_id: &str, topic: &str, caller_uri: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(Call::UnregisterPublisher(topic.to_string()));
        let now_empty = state
            .publishers
            .get_mut(topic)
            .map(|(_, uris)| {
                uris.retain(|u| u != caller_uri);
                uris.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            state.publishers.remove(topic);
        }
        Self::notify_publisher_update(&state, topic);
        Ok(())
    }

    fn register_subscriber(
        &self,
        _caller_id: &str,
        topic: &str,
        _ty: &TypeDescriptor,
        caller_uri: &str,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        state.log.push(Call::RegisterSubscriber(topic.to_string()));
        let subs = state.subscribers.entry(topic.to_string()).or_default();
        if !subs.iter().any(|u| u == caller_uri) {
            subs.push(caller_uri.to_string());
        }
        Ok(state
            .publishers
            .get(topic)
            .map(|(_, uris)| uris.clone())
            .unwrap_or_default())
    }

    fn unregister_subscriber(&self, _caller_id: &str, topic: &str, caller_uri: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(Call::UnregisterSubscriber(topic.to_string()));
        let now_empty = state
            .subscribers
            .get_mut(topic)
            .map(|subs| {
                subs.retain(|u| u != caller_uri);
                subs.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            state.subscribers.remove(topic);
        }
        Ok(())
    }

    fn register_service(
        &self,
        _caller_id: &str,
        service: &str,
        service_uri: &str,
        _caller_uri: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(Call::RegisterService(service.to_string()));
        state
            .services
            .insert(service.to_string(), service_uri.to_string());
        Ok(())
    }

    fn unregister_service(&self, _caller_id: &str, service: &str, service_uri: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(Call::UnregisterService(service.to_string()));
        if state.services.get(service).map(String::as_str) == Some(service_uri) {
            state.services.remove(service);
        }
        Ok(())
    }

    fn lookup_service(&self, _caller_id: &str, service: &str) -> Result<String> {
        self.state
            .lock()
            .services
            .get(service)
            .cloned()
            .ok_or_else(|| Error::ServiceUnavailable(service.to_string()))
    }

    fn get_published_topics(&self, _caller_id: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .state
            .lock()
            .publishers
            .iter()
            .map(|(topic, (ty, _))| (topic.clone(), ty.clone()))
            .collect())
    }

    fn set_param(&self, _caller_id: &str, key: &str, value: &ParamValue) -> Result<()> {
        let mut state = self.state.lock();
        state.params.insert(key.to_string(), value.clone());
        // Push the new value to every subscribed node.
        if let Some(uris) = state.param_subs.get(key) {
            for uri in uris {
                if let Some(events) = state.events.get(uri).and_then(Weak::upgrade) {
                    events.param_update(key, value);
                }
            }
        }
        Ok(())
    }

    fn get_param(&self, _caller_id: &str, key: &str) -> Result<Option<ParamValue>> {
        Ok(self.state.lock().params.get(key).cloned())
    }

    fn has_param(&self, _caller_id: &str, key: &str) -> Result<bool> {
        Ok(self.state.lock().params.contains_key(key))
    }

    fn delete_param(&self, _caller_id: &str, key: &str) -> Result<bool> {
        Ok(self.state.lock().params.remove(key).is_some())
    }

    fn subscribe_param(
        &self,
        _caller_id: &str,
        callback_uri: &str,
        key: &str,
    ) -> Result<Option<ParamValue>> {
        let mut state = self.state.lock();
        let subs = state.param_subs.entry(key.to_string()).or_default();
        if !subs.iter().any(|u| u == callback_uri) {
            subs.push(callback_uri.to_string());
        }
        Ok(state.params.get(key).cloned())
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn attach_events(&self, caller_uri: &str, events: Weak<dyn GraphEvents>) {
        self.state
            .lock()
            .events
            .insert(caller_uri.to_string(), events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new("pkg/Type", "abc")
    }

    #[test]
    fn registration_counts_are_recorded() {
        let master = MemoryMaster::new();
        master
            .register_publisher("/n", "/topic", &descriptor(), "rosrt://a:1")
            .unwrap();
        master
            .register_publisher("/n", "/topic", &descriptor(), "rosrt://a:1")
            .unwrap();
        master
            .unregister_publisher("/n", "/topic", "rosrt://a:1")
            .unwrap();

        assert_eq!(master.publisher_registrations("/topic"), 2);
        assert_eq!(master.publisher_unregistrations("/topic"), 1);
        assert!(master.publishers_of("/topic").is_empty());
    }

    #[test]
    fn subscriber_gets_current_publishers() {
        let master = MemoryMaster::new();
        master
            .register_publisher("/p", "/t", &descriptor(), "rosrt://p:1")
            .unwrap();
        let uris = master
            .register_subscriber("/s", "/t", &descriptor(), "rosrt://s:1")
            .unwrap();
        assert_eq!(uris, vec!["rosrt://p:1".to_string()]);
    }

    #[test]
    fn lookup_missing_service_fails() {
        let master = MemoryMaster::new();
        assert!(matches!(
            master.lookup_service("/n", "/svc"),
            Err(Error::ServiceUnavailable(_))
        ));
        master
            .register_service("/n", "/svc", "rosrt://n:2", "rosrt://n:1")
            .unwrap();
        assert_eq!(master.lookup_service("/n", "/svc").unwrap(), "rosrt://n:2");
    }

    #[test]
    fn param_updates_reach_subscribed_sinks() {
        struct Sink(parking_lot::Mutex<Vec<(String, ParamValue)>>);
        impl GraphEvents for Sink {
            fn publisher_update(&self, _topic: &str, _uris: &[String]) {}
            fn param_update(&self, key: &str, value: &ParamValue) {
                self.0.lock().push((key.to_string(), value.clone()));
            }
        }

        let master = MemoryMaster::new();
        let sink = Arc::new(Sink(parking_lot::Mutex::new(Vec::new())));
        let weak: Weak<dyn GraphEvents> = Arc::downgrade(&sink) as Weak<dyn GraphEvents>;
        master.attach_events("rosrt://s:1", weak);

        master
            .subscribe_param("/n", "rosrt://s:1", "/gain")
            .unwrap();
        master.set_param("/n", "/gain", &ParamValue::Int(5)).unwrap();

        let seen = sink.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("/gain".to_string(), ParamValue::Int(5)));
    }
}
