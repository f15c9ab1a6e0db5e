//! # Tree Model
//!
//! ## Role
//! Phylogenetic tree plus substitution-model metadata, as consumed by the
//! pipeline before sampling starts: compatibility checks, pruning of leaves
//! absent from the alignment, and name lookups for the reference row.
//!
//! The likelihood math lives behind the emission provider; this type only
//! carries topology and the options that decide whether a model is usable.

use std::path::Path;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MotifError, Result};
use crate::io::load_json;

/// Substitution model family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubstModel {
    #[serde(rename = "JC69")]
    Jc69,
    #[serde(rename = "K80")]
    K80,
    #[serde(rename = "F81")]
    F81,
    #[serde(rename = "HKY85")]
    Hky85,
    #[serde(rename = "HKY85G")]
    Hky85G,
    #[serde(rename = "REV")]
    Rev,
    #[serde(rename = "SSREV")]
    SsRev,
    #[serde(rename = "REV_GC")]
    RevGc,
    #[serde(rename = "UNREST")]
    Unrest,
    #[serde(rename = "R2")]
    R2,
    #[serde(rename = "U2")]
    U2,
    #[serde(rename = "R3")]
    R3,
    #[serde(rename = "U3")]
    U3,
}

impl SubstModel {
    /// Context order: 0 for single-nucleotide models, 1 for dinucleotide, 2 for codon
    pub fn order(self) -> usize {
        match self {
            SubstModel::R2 | SubstModel::U2 => 1,
            SubstModel::R3 | SubstModel::U3 => 2,
            _ => 0,
        }
    }

    pub fn is_reversible(self) -> bool {
        !matches!(self, SubstModel::Unrest | SubstModel::U2 | SubstModel::U3)
    }

    pub fn name(self) -> &'static str {
        match self {
            SubstModel::Jc69 => "JC69",
            SubstModel::K80 => "K80",
            SubstModel::F81 => "F81",
            SubstModel::Hky85 => "HKY85",
            SubstModel::Hky85G => "HKY85G",
            SubstModel::Rev => "REV",
            SubstModel::SsRev => "SSREV",
            SubstModel::RevGc => "REV_GC",
            SubstModel::Unrest => "UNREST",
            SubstModel::R2 => "R2",
            SubstModel::U2 => "U2",
            SubstModel::R3 => "R3",
            SubstModel::U3 => "U3",
        }
    }
}

/// One tree node; the root has no parent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub parent: Option<usize>,
    #[serde(default)]
    pub branch_length: f64,
}

fn default_ratecats() -> usize {
    1
}

/// Tree topology and substitution-model options
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeModel {
    pub subst_mod: SubstModel,
    #[serde(default = "default_ratecats")]
    pub nratecats: usize,
    pub nodes: Vec<TreeNode>,
}

impl TreeModel {
    /// Load a tree model from JSON
    pub fn from_path(path: &Path) -> Result<Self> {
        let model: TreeModel = load_json(path)?;
        model.check_topology()?;
        Ok(model)
    }

    /// Reject model options the sampler cannot use; warn on non-reversible models
    pub fn validate(&self) -> Result<()> {
        if self.nratecats > 1 {
            return Err(MotifError::model(format!(
                "rate variation not supported ({} rate categories)",
                self.nratecats
            )));
        }
        if self.subst_mod.order() > 0 {
            return Err(MotifError::model(format!(
                "substitution model {} has order {}; only single-nucleotide models are supported",
                self.subst_mod.name(),
                self.subst_mod.order()
            )));
        }
        if !self.subst_mod.is_reversible() {
            warn!(
                subst_mod = self.subst_mod.name(),
                "p-value computation assumes a reversible model"
            );
        }
        Ok(())
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Leaf names in node order
    pub fn leaves(&self) -> Vec<&str> {
        let n_children = self.child_counts();
        self.nodes
            .iter()
            .zip(&n_children)
            .filter(|(_, &c)| c == 0)
            .map(|(node, _)| node.name.as_str())
            .collect()
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name)
    }

    /// Remove leaves whose names are not in `keep`.
    ///
    /// Internal nodes left without children are removed, and internal nodes
    /// left with a single child are collapsed into that child (branch lengths
    /// summed). Returns the names of pruned leaves.
    pub fn prune(&mut self, keep: &[String]) -> Result<Vec<String>> {
        let keep: FxHashSet<&str> = keep.iter().map(String::as_str).collect();
        let leaves = self.leaves();
        let n_leaves = leaves.len();
        let pruned: Vec<String> = leaves
            .iter()
            .filter(|name| !keep.contains(**name))
            .map(|name| name.to_string())
            .collect();

        if pruned.len() == n_leaves {
            return Err(MotifError::model(
                "no match for leaves of tree in alignment (leaf names must match)",
            ));
        }
        if 2 * pruned.len() > n_leaves {
            return Err(MotifError::model(format!(
                "pruning would remove {} of {} leaves",
                pruned.len(),
                n_leaves
            )));
        }
        if pruned.is_empty() {
            return Ok(pruned);
        }

        let n = self.nodes.len();
        let mut alive = vec![true; n];
        let mut parent: Vec<Option<usize>> = self.nodes.iter().map(|node| node.parent).collect();
        let mut branch: Vec<f64> = self.nodes.iter().map(|node| node.branch_length).collect();
        let n_children = self.child_counts();
        for (i, node) in self.nodes.iter().enumerate() {
            if n_children[i] == 0 && !keep.contains(node.name.as_str()) {
                alive[i] = false;
            }
        }

        // Drop internal nodes whose whole subtree was pruned, then splice out
        // unary nodes, until nothing changes.
        loop {
            let mut live_children: Vec<Vec<usize>> = vec![Vec::new(); n];
            for i in 0..n {
                if let (true, Some(p)) = (alive[i], parent[i]) {
                    live_children[p].push(i);
                }
            }
            let mut changed = false;
            for i in 0..n {
                if !alive[i] || n_children[i] == 0 {
                    continue;
                }
                match live_children[i].as_slice() {
                    [] => {
                        alive[i] = false;
                        changed = true;
                    }
                    [only] => {
                        let only = *only;
                        match parent[i] {
                            Some(p) => {
                                parent[only] = Some(p);
                                branch[only] += branch[i];
                            }
                            None => {
                                parent[only] = None;
                                branch[only] = 0.0;
                            }
                        }
                        alive[i] = false;
                        changed = true;
                    }
                    _ => {}
                }
                if changed {
                    break;
                }
            }
            if !changed {
                break;
            }
        }

        let mut remap = vec![usize::MAX; n];
        let mut nodes = Vec::with_capacity(n);
        for i in (0..n).filter(|&i| alive[i]) {
            remap[i] = nodes.len();
            nodes.push(TreeNode {
                name: self.nodes[i].name.clone(),
                parent: parent[i],
                branch_length: branch[i],
            });
        }
        for node in &mut nodes {
            node.parent = node.parent.map(|p| remap[p]);
        }
        self.nodes = nodes;

        Ok(pruned)
    }

    fn child_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.nodes.len()];
        for node in &self.nodes {
            if let Some(p) = node.parent {
                counts[p] += 1;
            }
        }
        counts
    }

    fn check_topology(&self) -> Result<()> {
        let n = self.nodes.len();
        if n == 0 {
            return Err(MotifError::model("tree has no nodes"));
        }
        let n_roots = self.nodes.iter().filter(|node| node.parent.is_none()).count();
        if n_roots != 1 {
            return Err(MotifError::model(format!("tree has {} roots, expected 1", n_roots)));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(p) = node.parent {
                if p >= n || p == i {
                    return Err(MotifError::model(format!(
                        "node {} has invalid parent index {}",
                        node.name, p
                    )));
                }
            }
        }
        // Every node must reach the root within n steps
        for start in 0..n {
            let mut cur = start;
            let mut steps = 0;
            while let Some(p) = self.nodes[cur].parent {
                cur = p;
                steps += 1;
                if steps > n {
                    return Err(MotifError::model("tree contains a cycle"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, parent: Option<usize>, bl: f64) -> TreeNode {
        TreeNode {
            name: name.to_string(),
            parent,
            branch_length: bl,
        }
    }

    /// ((hg:0.1,pt:0.1)hp:0.2,(mm:0.3,rn:0.3)mr:0.2)root
    fn five_leaf_tree() -> TreeModel {
        TreeModel {
            subst_mod: SubstModel::Hky85,
            nratecats: 1,
            nodes: vec![
                node("root", None, 0.0),
                node("hp", Some(0), 0.2),
                node("hg", Some(1), 0.1),
                node("pt", Some(1), 0.1),
                node("mr", Some(0), 0.2),
                node("mm", Some(4), 0.3),
                node("rn", Some(4), 0.3),
            ],
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_leaves() {
        assert_eq!(five_leaf_tree().leaves(), vec!["hg", "pt", "mm", "rn"]);
    }

    #[test]
    fn test_prune_collapses_unary() {
        let mut tree = five_leaf_tree();
        let pruned = tree.prune(&names(&["hg", "mm", "rn"])).unwrap();
        assert_eq!(pruned, vec!["pt".to_string()]);
        assert_eq!(tree.leaves(), vec!["hg", "mm", "rn"]);
        assert!(!tree.has_node("hp"));

        let hg = tree.nodes.iter().find(|n| n.name == "hg").unwrap();
        assert!((hg.branch_length - 0.3).abs() < 1e-12);
        assert_eq!(tree.nodes[hg.parent.unwrap()].name, "root");
        tree.check_topology().unwrap();
    }

    #[test]
    fn test_prune_to_half_collapses_root() {
        let mut tree = five_leaf_tree();
        let pruned = tree.prune(&names(&["mm", "rn"])).unwrap();
        assert_eq!(pruned.len(), 2);
        assert_eq!(tree.leaves(), vec!["mm", "rn"]);
        let root = tree.nodes.iter().find(|n| n.parent.is_none()).unwrap();
        assert_eq!(root.name, "mr");
        tree.check_topology().unwrap();
    }

    #[test]
    fn test_prune_rejects_majority() {
        let mut tree = five_leaf_tree();
        assert!(tree.prune(&names(&["hg"])).is_err());
        assert!(tree.prune(&names(&["xx"])).is_err());
        assert_eq!(tree.n_nodes(), 7);
    }

    #[test]
    fn test_validate_options() {
        let mut tree = five_leaf_tree();
        tree.validate().unwrap();

        tree.nratecats = 4;
        assert!(matches!(tree.validate(), Err(MotifError::ModelCompat { .. })));

        tree.nratecats = 1;
        tree.subst_mod = SubstModel::R2;
        assert!(tree.validate().is_err());

        tree.subst_mod = SubstModel::Unrest;
        tree.validate().unwrap();
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().expect("Create temp dir");
        let path = dir.path().join("tree.json");
        std::fs::write(
            &path,
            r#"{"subst_mod": "REV_GC", "nodes": [
                {"name": "root", "parent": null},
                {"name": "a", "parent": 0, "branch_length": 0.5},
                {"name": "b", "parent": 0, "branch_length": 0.5}
            ]}"#,
        )
        .unwrap();
        let tree = TreeModel::from_path(&path).unwrap();
        assert_eq!(tree.subst_mod, SubstModel::RevGc);
        assert_eq!(tree.nratecats, 1);

        std::fs::write(&path, r#"{"subst_mod": "JC69", "nodes": [{"name": "a", "parent": 0}]}"#).unwrap();
        assert!(TreeModel::from_path(&path).is_err());
    }
}
