// SPDX-License-Identifier: PMPL-1.0-or-later

//! Logic-tree evaluation
//!
//! A rule's logic is a tree of [`Statement`]s. Evaluating it against a
//! [`crate::features::FeatureSet`] yields a [`MatchResult`] tree recording
//! which nodes succeeded and where.

pub mod result;
pub mod statement;

pub use result::{merge_results, MatchResult, MatchResults};
pub use statement::{FeatureNode, Quantifier, Statement};
