//! Read-only placement view.
//!
//! Placement is derived from pod labels: a pod belongs to a controller iff
//! its label map carries the controller's id under [`RC_ID_LABEL`]. Both
//! the reconciler and the node-transfer engine read placement through this
//! module; neither calls into the other.

use herd_id::{NodeName, PodId, RcId};

use crate::labels::{split_pod_label_key, LabelError, LabelSelector, LabelType, Labeler, RC_ID_LABEL};

/// One scheduled pod.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PodLocation {
    pub node: NodeName,
    pub pod_id: PodId,
}

/// Returns every pod owned by the controller, sorted by node.
pub async fn current_pods(
    rc_id: RcId,
    labeler: &dyn Labeler,
) -> Result<Vec<PodLocation>, LabelError> {
    let selector = LabelSelector::everything().require(RC_ID_LABEL, rc_id.to_string());
    let matches = labeler.matches(&selector, LabelType::Pod).await?;

    let mut pods = Vec::with_capacity(matches.len());
    for label_match in matches {
        let (node, pod_id) = split_pod_label_key(&label_match.key)?;
        pods.push(PodLocation { node, pod_id });
    }
    pods.sort();
    Ok(pods)
}
