// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core type definitions for capscan
//!
//! Addresses identify where a feature was observed; scopes describe the
//! granularity at which a rule is evaluated. Static analysis walks
//! instruction → basic block → function → file, dynamic analysis walks
//! call → thread → process → file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A process observed in a dynamic trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessAddress {
    pub ppid: u64,
    pub pid: u64,
}

/// A thread within a traced process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadAddress {
    pub process: ProcessAddress,
    pub tid: u64,
}

/// The n-th API call made by a traced thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallAddress {
    pub thread: ThreadAddress,
    pub id: u64,
}

/// Where a feature was observed.
///
/// `NoAddress` marks features that hold for a scope as a whole (file-level
/// characteristics, the OS, the architecture) rather than at a location.
/// Serialized as a tagged pair: `{"type": "absolute", "value": 4198400}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Address {
    Absolute(u64),
    Process(ProcessAddress),
    Thread(ThreadAddress),
    Call(CallAddress),
    NoAddress,
}

impl Address {
    pub fn is_none(&self) -> bool {
        matches!(self, Address::NoAddress)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Absolute(va) => write!(f, "0x{:X}", va),
            Address::Process(p) => write!(f, "process{{pid:{},ppid:{}}}", p.pid, p.ppid),
            Address::Thread(t) => write!(f, "process{{pid:{}}},thread{{tid:{}}}", t.process.pid, t.tid),
            Address::Call(c) => write!(
                f,
                "process{{pid:{}}},thread{{tid:{}}},call{{id:{}}}",
                c.thread.process.pid, c.thread.tid, c.id
            ),
            Address::NoAddress => write!(f, "global"),
        }
    }
}

/// Which kind of extractor produced the features
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Static,
    Dynamic,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Static => write!(f, "static"),
            Flavor::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Granularity at which a rule is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "basic block")]
    BasicBlock,
    #[serde(rename = "instruction")]
    Instruction,
    #[serde(rename = "process")]
    Process,
    #[serde(rename = "thread")]
    Thread,
    #[serde(rename = "call")]
    Call,
}

impl Scope {
    pub fn all() -> Vec<Self> {
        vec![
            Scope::File,
            Scope::Function,
            Scope::BasicBlock,
            Scope::Instruction,
            Scope::Process,
            Scope::Thread,
            Scope::Call,
        ]
    }

    /// The flavor this scope belongs to; `None` for file scope, which tops both hierarchies
    pub fn flavor(&self) -> Option<Flavor> {
        match self {
            Scope::File => None,
            Scope::Function | Scope::BasicBlock | Scope::Instruction => Some(Flavor::Static),
            Scope::Process | Scope::Thread | Scope::Call => Some(Flavor::Dynamic),
        }
    }

    pub fn belongs_to(&self, flavor: Flavor) -> bool {
        self.flavor().map_or(true, |f| f == flavor)
    }

    /// Depth in its hierarchy: 0 for the narrowest scope, 3 for file
    pub fn rank(&self) -> u8 {
        match self {
            Scope::Instruction | Scope::Call => 0,
            Scope::BasicBlock | Scope::Thread => 1,
            Scope::Function | Scope::Process => 2,
            Scope::File => 3,
        }
    }

    /// True if `self` is nested within (or equal to) `other` in a shared hierarchy
    pub fn is_within(&self, other: Scope) -> bool {
        let shared = match (self.flavor(), other.flavor()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        shared && self.rank() <= other.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::File => "file",
            Scope::Function => "function",
            Scope::BasicBlock => "basic block",
            Scope::Instruction => "instruction",
            Scope::Process => "process",
            Scope::Thread => "thread",
            Scope::Call => "call",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "file" => Ok(Scope::File),
            "function" => Ok(Scope::Function),
            "basic block" => Ok(Scope::BasicBlock),
            "instruction" => Ok(Scope::Instruction),
            "process" => Ok(Scope::Process),
            "thread" => Ok(Scope::Thread),
            "call" => Ok(Scope::Call),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// The static and dynamic scope a rule declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scopes {
    #[serde(rename = "static")]
    pub static_scope: Option<Scope>,
    #[serde(rename = "dynamic")]
    pub dynamic_scope: Option<Scope>,
}

impl Scopes {
    pub fn new(static_scope: Option<Scope>, dynamic_scope: Option<Scope>) -> Self {
        Self {
            static_scope,
            dynamic_scope,
        }
    }

    pub fn both(static_scope: Scope, dynamic_scope: Scope) -> Self {
        Self::new(Some(static_scope), Some(dynamic_scope))
    }

    pub fn static_only(scope: Scope) -> Self {
        Self::new(Some(scope), None)
    }

    pub fn dynamic_only(scope: Scope) -> Self {
        Self::new(None, Some(scope))
    }

    pub fn for_flavor(&self, flavor: Flavor) -> Option<Scope> {
        match flavor {
            Flavor::Static => self.static_scope,
            Flavor::Dynamic => self.dynamic_scope,
        }
    }

    /// Declared scopes, deduplicated (a rule may declare file scope for both flavors)
    pub fn iter(&self) -> impl Iterator<Item = Scope> {
        let dynamic = match self.dynamic_scope {
            Some(d) if Some(d) != self.static_scope => Some(d),
            _ => None,
        };
        self.static_scope.into_iter().chain(dynamic)
    }

    /// Problems with the declared scopes, if any
    pub fn validate(&self) -> Option<String> {
        if self.static_scope.is_none() && self.dynamic_scope.is_none() {
            return Some("rule declares neither a static nor a dynamic scope".to_string());
        }
        if let Some(s) = self.static_scope {
            if !s.belongs_to(Flavor::Static) {
                return Some(format!("{} is not a static scope", s));
            }
        }
        if let Some(d) = self.dynamic_scope {
            if !d.belongs_to(Flavor::Dynamic) {
                return Some(format!("{} is not a dynamic scope", d));
            }
        }
        None
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |s: Option<Scope>| s.map_or("unsupported", |s| s.as_str());
        write!(
            f,
            "static: {}, dynamic: {}",
            show(self.static_scope),
            show(self.dynamic_scope)
        )
    }
}
