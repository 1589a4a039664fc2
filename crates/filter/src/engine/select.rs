//! Axis traversal and node tests.
//!
//! Every cursor move goes through the navigator, so a [`QuotaNavigator`](crate::model::QuotaNavigator)
//! sees exactly one charge per step. Seeks back to a known position are free.

use crate::compiler::ir::{SelectAxis, SelectCriteria};
use crate::error::NavResult;
use crate::model::{NodeKind, NodePos, Navigator};

/// Whether the node under the cursor passes the kind mask and the name test.
pub fn node_matches<N: Navigator>(criteria: &SelectCriteria, nav: &N) -> bool {
    let kind = nav.kind();
    if !criteria.matches_kind(kind) {
        return false;
    }
    match kind {
        NodeKind::Element | NodeKind::Attribute => criteria.test.matches(nav.namespace_uri(), nav.local_name()),
        NodeKind::ProcessingInstruction => criteria.test.local.as_ref().is_none_or(|target| target.as_ref() == nav.local_name()),
        _ => true,
    }
}

/// Append every node reachable from `from` along the criteria's axis that passes its test.
/// Results come out in document order.
pub fn select<N: Navigator>(criteria: &SelectCriteria, nav: &mut N, from: NodePos, dest: &mut Vec<NodePos>) -> NavResult<()> {
    nav.set_position(from)?;
    match criteria.axis {
        SelectAxis::SelfAxis => {
            if node_matches(criteria, nav) {
                dest.push(from);
            }
            Ok(())
        }
        SelectAxis::Child => select_children(criteria, nav, dest),
        SelectAxis::Attribute => select_attributes(criteria, nav, dest),
        SelectAxis::Descendant => select_descendants(criteria, nav, from, dest),
        SelectAxis::DescendantOrSelf => {
            if node_matches(criteria, nav) {
                dest.push(from);
            }
            select_descendants(criteria, nav, from, dest)
        }
    }
}

fn select_children<N: Navigator>(criteria: &SelectCriteria, nav: &mut N, dest: &mut Vec<NodePos>) -> NavResult<()> {
    if !nav.move_to_first_child()? {
        return Ok(());
    }
    loop {
        if node_matches(criteria, nav) {
            dest.push(nav.position());
        }
        if !nav.move_to_next()? {
            return Ok(());
        }
    }
}

fn select_attributes<N: Navigator>(criteria: &SelectCriteria, nav: &mut N, dest: &mut Vec<NodePos>) -> NavResult<()> {
    if nav.kind() != NodeKind::Element || !criteria.matches_kind(NodeKind::Attribute) {
        return Ok(());
    }
    // An element carries at most one attribute per qualified name.
    if let (Some(ns), Some(local)) = (&criteria.test.ns, &criteria.test.local) {
        if nav.move_to_attribute(local, ns)? {
            dest.push(nav.position());
        }
        return Ok(());
    }
    if !nav.move_to_first_attribute()? {
        return Ok(());
    }
    loop {
        if node_matches(criteria, nav) {
            dest.push(nav.position());
        }
        if !nav.move_to_next_attribute()? {
            return Ok(());
        }
    }
}

fn select_descendants<N: Navigator>(
    criteria: &SelectCriteria,
    nav: &mut N,
    from: NodePos,
    dest: &mut Vec<NodePos>,
) -> NavResult<()> {
    if !nav.move_to_first_child()? {
        return Ok(());
    }
    'walk: loop {
        if node_matches(criteria, nav) {
            dest.push(nav.position());
        }
        if nav.move_to_first_child()? {
            continue;
        }
        loop {
            if nav.move_to_next()? {
                continue 'walk;
            }
            if !nav.move_to_parent()? || nav.position() == from {
                return Ok(());
            }
        }
    }
}

/// Evaluate a select followed by a run of fused self/child selects without materializing
/// the intermediate results. `first` runs over every input; each of `rest` runs from every
/// node the previous step produced, in the order produced.
///
/// The head step's output is sorted and de-duplicated before the fused steps walk it. Child
/// and self steps map distinct nodes to distinct nodes, so every later step visits each
/// node exactly once, as the step-by-step form does, and the charges match.
pub fn select_fused<N: Navigator>(
    first: &SelectCriteria,
    rest: &[&SelectCriteria],
    nav: &mut N,
    inputs: &[NodePos],
    scratch: &mut Vec<NodePos>,
    dest: &mut Vec<NodePos>,
) -> NavResult<()> {
    scratch.clear();
    for &node in inputs {
        select(first, nav, node, scratch)?;
    }
    if inputs.len() > 1 {
        sort_dedup(scratch);
    }
    let Some((next, tail)) = rest.split_first() else {
        dest.extend_from_slice(scratch);
        return Ok(());
    };
    let start = dest.len();
    for &node in scratch.iter() {
        descend(next, tail, nav, node, dest)?;
    }
    if dest.len() - start > 1 {
        sort_dedup_from(dest, start);
    }
    Ok(())
}

fn descend<N: Navigator>(
    step: &SelectCriteria,
    rest: &[&SelectCriteria],
    nav: &mut N,
    from: NodePos,
    dest: &mut Vec<NodePos>,
) -> NavResult<()> {
    let Some((next, tail)) = rest.split_first() else {
        return select(step, nav, from, dest);
    };
    nav.set_position(from)?;
    match step.axis {
        SelectAxis::SelfAxis => {
            if node_matches(step, nav) {
                descend(next, tail, nav, from, dest)?;
            }
            Ok(())
        }
        _ => {
            if !nav.move_to_first_child()? {
                return Ok(());
            }
            loop {
                let here = nav.position();
                if node_matches(step, nav) {
                    descend(next, tail, nav, here, dest)?;
                    nav.set_position(here)?;
                }
                if !nav.move_to_next()? {
                    return Ok(());
                }
            }
        }
    }
}

pub fn sort_dedup(nodes: &mut Vec<NodePos>) {
    nodes.sort_unstable();
    nodes.dedup();
}

fn sort_dedup_from(nodes: &mut Vec<NodePos>, start: usize) {
    nodes[start..].sort_unstable();
    let mut tail = nodes.split_off(start);
    tail.dedup();
    nodes.append(&mut tail);
}
