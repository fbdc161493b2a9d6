use crate::layout::{LayoutError, MindMapLayout, Palette, compute_layout};
use crate::measure::{MeasuredNode, MeasurementPass};
use crate::outline::{NodeId, Outline};

/// Outcome of feeding one measurement batch to a [`LayoutDriver`].
#[derive(Debug, PartialEq)]
pub enum BatchOutcome {
    /// The batch belonged to an outline that has since been replaced.
    Discarded,
    Pending { missing: usize },
    /// The pass completed and a fresh layout was computed.
    Ready,
}

/// Owns the current outline, its in-flight measurement pass, and the last
/// complete layout. Replacing the outline drops both; layouts are only ever
/// recomputed from scratch.
#[derive(Debug)]
pub struct LayoutDriver {
    outline: Outline,
    palette: Palette,
    pass: MeasurementPass,
    layout: Option<MindMapLayout>,
}

impl LayoutDriver {
    pub fn new(outline: Outline, palette: Palette) -> Self {
        let pass = MeasurementPass::new(&outline);
        Self {
            outline,
            palette,
            pass,
            layout: None,
        }
    }

    pub fn outline(&self) -> &Outline {
        &self.outline
    }

    /// Fingerprint a measurement batch must carry to be accepted.
    pub fn generation(&self) -> u64 {
        self.pass.fingerprint()
    }

    pub fn layout(&self) -> Option<&MindMapLayout> {
        self.layout.as_ref()
    }

    /// Node ids (with labels) the render surface still has to measure.
    pub fn pending_labels(&self) -> Vec<(NodeId, String)> {
        self.pass
            .missing()
            .into_iter()
            .filter_map(|id| self.outline.label(&id).map(|label| (id, label.to_string())))
            .collect()
    }

    /// Swaps in a new outline. An identical outline keeps the current state.
    pub fn set_outline(&mut self, outline: Outline) {
        if outline.fingerprint() == self.generation() && outline == self.outline {
            return;
        }
        tracing::debug!(nodes = outline.node_count(), "outline replaced; restarting measurement");
        self.pass = MeasurementPass::new(&outline);
        self.outline = outline;
        self.layout = None;
    }

    pub fn set_palette(&mut self, palette: Palette) -> Result<(), LayoutError> {
        self.palette = palette;
        if self.layout.is_some() {
            self.relayout()?;
        }
        Ok(())
    }

    pub fn record_batch(
        &mut self,
        generation: u64,
        nodes: &[MeasuredNode],
    ) -> Result<BatchOutcome, LayoutError> {
        if generation != self.generation() {
            tracing::debug!(
                stale = generation,
                current = self.generation(),
                "discarding measurements for a replaced outline"
            );
            return Ok(BatchOutcome::Discarded);
        }

        self.pass.record_all(nodes.iter().copied())?;
        let missing = self.pass.missing().len();
        if missing > 0 {
            return Ok(BatchOutcome::Pending { missing });
        }

        self.relayout()?;
        Ok(BatchOutcome::Ready)
    }

    fn relayout(&mut self) -> Result<(), LayoutError> {
        let measurements = self.pass.clone().into_ready().ok_or_else(|| LayoutError::NotReady {
            missing: self.pass.missing(),
        })?;
        self.layout = Some(compute_layout(&self.outline, &measurements, &self.palette)?);
        Ok(())
    }
}
