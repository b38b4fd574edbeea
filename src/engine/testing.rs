//! Scripted engine connections for unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::connection::{EngineConnection, EngineConnector, RowMap};
use crate::dcs::Member;

#[derive(Default)]
struct Script {
    rows: HashMap<String, Result<Vec<RowMap>, String>>,
    failing: HashMap<String, String>,
    executed: Vec<String>,
    latency: Option<Duration>,
}

/// Answers queries from canned rows and records every executed statement.
/// Unscripted queries return no rows; unscripted statements succeed.
#[derive(Default)]
pub struct ScriptedConnection {
    script: Mutex<Script>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, sql: &str, rows: Vec<RowMap>) {
        self.lock().rows.insert(sql.to_string(), Ok(rows));
    }

    pub fn set_error(&self, sql: &str, message: &str) {
        self.lock().rows.insert(sql.to_string(), Err(message.to_string()));
    }

    pub fn fail_statement(&self, sql: &str, message: &str) {
        self.lock().failing.insert(sql.to_string(), message.to_string());
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Statements passed to `execute`, in order, including failed ones.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("mutex poisoned")
    }
}

impl EngineConnection for ScriptedConnection {
    fn query_rows(
        &self,
        sql: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<RowMap>>> + Send + '_>> {
        let sql = sql.to_string();
        Box::pin(async move {
            let (latency, answer) = {
                let script = self.lock();
                (script.latency, script.rows.get(&sql).cloned())
            };
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            match answer {
                Some(Ok(rows)) => Ok(rows),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(Vec::new()),
            }
        })
    }

    fn execute(&self, sql: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send + '_>> {
        let sql = sql.to_string();
        Box::pin(async move {
            let (latency, failure) = {
                let mut script = self.lock();
                script.executed.push(sql.clone());
                (script.latency, script.failing.get(&sql).cloned())
            };
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            match failure {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(0),
            }
        })
    }
}

/// Hands out scripted connections by member name.
#[derive(Default)]
pub struct ScriptedConnector {
    connections: Mutex<HashMap<String, Arc<ScriptedConnection>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, member: &str, conn: Arc<ScriptedConnection>) {
        self.connections
            .lock()
            .expect("mutex poisoned")
            .insert(member.to_string(), conn);
    }
}

impl EngineConnector for ScriptedConnector {
    fn connect(&self, member: &Member) -> anyhow::Result<Arc<dyn EngineConnection>> {
        let connections = self.connections.lock().expect("mutex poisoned");
        match connections.get(&member.name) {
            Some(conn) => Ok(conn.clone() as Arc<dyn EngineConnection>),
            None => anyhow::bail!("no route to {}", member.name),
        }
    }
}
