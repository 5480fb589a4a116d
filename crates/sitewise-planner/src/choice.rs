//! Binding projection and choice enumeration over a plan subtree.

use sitewise_core::id::NodeIdx;
use sitewise_core::BindingMap;
use sitewise_operators::expr::ChoiceNodes;

use crate::error::{PlanError, Result};
use crate::plan::{PlanGraph, PlanOp};

/// The alternative an `Index` binding selects for `choice_id`.
pub fn chosen_alternative(
    choice_id: &str,
    choices: &[NodeIdx],
    binding: &BindingMap,
) -> Result<NodeIdx> {
    let idx = binding.get(choice_id)?.get_index()?;
    usize::try_from(idx)
        .ok()
        .and_then(|i| choices.get(i).copied())
        .ok_or_else(|| {
            PlanError::Choice(format!(
                "index {idx} out of range for '{choice_id}' with {} alternatives",
                choices.len()
            ))
        })
}

impl PlanGraph {
    /// Copy into `useful` exactly the bindings the subtree at `idx` reads.
    ///
    /// An `AnyPlan` records its own choice id and descends only into the
    /// selected alternative.
    pub fn pick_useful_binding(
        &self,
        idx: NodeIdx,
        binding: &BindingMap,
        useful: &mut BindingMap,
    ) -> Result<()> {
        let op = self.op(idx);
        if let PlanOp::AnyPlan { choice_id, choices } = op {
            useful.copy_from(binding, choice_id)?;
            let child = chosen_alternative(choice_id, choices, binding)?;
            return self.pick_useful_binding(child, binding, useful);
        }
        for child in op.inputs() {
            self.pick_useful_binding(child, binding, useful)?;
        }
        for expr in op.exprs() {
            expr.pick_useful_binding(binding, useful)?;
        }
        Ok(())
    }

    /// Convenience wrapper returning a fresh map.
    pub fn useful_binding(&self, idx: NodeIdx, binding: &BindingMap) -> Result<BindingMap> {
        let mut useful = BindingMap::new();
        self.pick_useful_binding(idx, binding, &mut useful)?;
        Ok(useful)
    }

    /// Record every choice node reachable from `idx`.
    ///
    /// Plan-level alternatives cannot be enumerated this way; an `AnyPlan`
    /// in the subtree is an error.
    pub fn get_all_choice_nodes(&self, idx: NodeIdx, out: &mut ChoiceNodes) -> Result<()> {
        let op = self.op(idx);
        if matches!(op, PlanOp::AnyPlan { .. }) {
            return Err(PlanError::Unsupported(format!(
                "cannot enumerate choices below AnyPlan[{}]",
                self.id_of(idx).get()
            )));
        }
        for expr in op.exprs() {
            expr.collect_choice_nodes(out)?;
        }
        for child in op.inputs() {
            self.get_all_choice_nodes(child, out)?;
        }
        Ok(())
    }

    pub fn choice_nodes(&self, idx: NodeIdx) -> Result<ChoiceNodes> {
        let mut out = ChoiceNodes::new();
        self.get_all_choice_nodes(idx, &mut out)?;
        Ok(out)
    }
}
