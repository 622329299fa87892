use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use phylo_core::errors::PhyloError;
use phylo_core::{NodeId, TreeNodeId};
use phylo_model::Model;
use phylo_tree::AugmentedTree;

use super::{monitor_io, Monitor, INCOMPLETE_MARKER};

/// Writes the tree of one node as annotated newick, one line per record.
#[derive(Debug)]
pub struct TreeMonitor {
    path: PathBuf,
    printgen: usize,
    node: String,
    id: Option<NodeId>,
    writer: Option<BufWriter<File>>,
}

impl TreeMonitor {
    /// Creates a monitor for the tree-valued node `node`.
    pub fn new(path: PathBuf, printgen: usize, node: String) -> Self {
        Self {
            path,
            printgen,
            node,
            id: None,
            writer: None,
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), PhyloError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|err| monitor_io("monitor-write", &self.path, err))
    }
}

impl Monitor for TreeMonitor {
    fn name(&self) -> &str {
        "tree"
    }

    fn printgen(&self) -> usize {
        self.printgen
    }

    fn start(&mut self, model: &Model) -> Result<(), PhyloError> {
        let id = model.node_id(&self.node)?;
        model.value(id)?.as_tree()?;
        self.id = Some(id);
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| monitor_io("monitor-mkdir", parent, err))?;
        }
        let file = File::create(&self.path).map_err(|err| monitor_io("monitor-create", &self.path, err))?;
        self.writer = Some(BufWriter::new(file));
        self.write_line("Iteration\tPosterior\tTree")
    }

    fn notify(&mut self, iteration: usize, model: &Model) -> Result<(), PhyloError> {
        let Some(id) = self.id else {
            return Ok(());
        };
        let newick = annotated_newick(model.value(id)?.as_tree()?)?;
        let line = format!("{iteration}\t{}\t{newick}", model.cached_log_posterior()?);
        self.write_line(&line)
    }

    fn finish(&mut self, completed: bool) -> Result<(), PhyloError> {
        if !completed {
            self.write_line(INCOMPLETE_MARKER)?;
        }
        self.writer = None;
        Ok(())
    }

    fn output_file(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Newick string whose branches carry `[&num_events=K,shifts="offset:lambda:mu;..."]`.
///
/// Unnamed tips are written as `t<index>`.
pub fn annotated_newick(tree: &AugmentedTree) -> Result<String, PhyloError> {
    let mut out = String::new();
    write_subtree(tree, tree.root(), &mut out)?;
    out.push(';');
    Ok(out)
}

fn write_subtree(tree: &AugmentedTree, id: TreeNodeId, out: &mut String) -> Result<(), PhyloError> {
    let vertex = tree.vertex(id)?;
    if !vertex.is_tip() {
        out.push('(');
        for (pos, child) in vertex.children.iter().enumerate() {
            if pos > 0 {
                out.push(',');
            }
            write_subtree(tree, *child, out)?;
        }
        out.push(')');
    }
    match &vertex.name {
        Some(name) => out.push_str(name),
        None if vertex.is_tip() => {
            let _ = write!(out, "t{}", id.index());
        }
        None => {}
    }
    if vertex.parent.is_some() {
        let shifts = tree
            .events_on(id)
            .iter()
            .filter_map(|event| tree.event(*event))
            .map(|event| {
                format!(
                    "{}:{}:{}",
                    event.offset, event.multipliers.speciation, event.multipliers.extinction
                )
            })
            .collect::<Vec<_>>()
            .join(";");
        let _ = write!(
            out,
            "[&num_events={},shifts=\"{shifts}\"]:{}",
            tree.num_events_on(id),
            tree.branch_length(id)?
        );
    }
    Ok(())
}
