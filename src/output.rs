//! Component D: the output buffer — a per-method scratchpad that assembles
//! one IC10 fragment per SBIL instruction into final text (`spec.md` §4.D).

/// One instruction slot: an optional comment, optional emitted code, and
/// whether a label must be emitted before it. `needsLabel` is set by branch
/// emitters and is idempotent (setting it twice is a no-op).
#[derive(Debug, Clone, Default)]
struct Slot {
    comment: Option<String>,
    code: Option<String>,
    needs_label: bool,
}

/// Mutable scratchpad for compiling a single method. Discarded once the
/// method body is appended to the driver's global output stream
/// (`spec.md` §3: "OutputWriter is the mutable scratchpad for a single
/// method compile").
#[derive(Debug, Clone)]
pub struct OutputWriter {
    label_prefix: String,
    slots: Vec<Slot>,
    preamble: Vec<String>,
    postamble: Vec<String>,
}

impl OutputWriter {
    /// Create a writer sized for `instruction_count` SBIL instructions,
    /// whose generated labels are named `{label_prefix}_il_{i}`.
    pub fn new(label_prefix: impl Into<String>, instruction_count: usize) -> Self {
        Self {
            label_prefix: label_prefix.into(),
            slots: vec![Slot::default(); instruction_count],
            preamble: Vec::new(),
            postamble: Vec::new(),
        }
    }

    /// Append a preamble line (emitted before the body).
    pub fn push_preamble(&mut self, line: impl Into<String>) {
        self.preamble.push(line.into());
    }

    /// Append a postamble line (emitted after the body).
    pub fn push_postamble(&mut self, line: impl Into<String>) {
        self.postamble.push(line.into());
    }

    /// Set the code for slot `i`, overwriting any previous code for that
    /// slot (a handler may be revisited when fusing a deferred expression
    /// into a later sink).
    pub fn set_code(&mut self, i: usize, code: impl Into<String>) {
        self.slots[i].code = Some(code.into());
    }

    /// Append to the existing code of slot `i` (used when a handler spans
    /// more than one line, e.g. a materialised deferred expression followed
    /// by its sink).
    pub fn append_code(&mut self, i: usize, code: impl Into<String>) {
        let slot = &mut self.slots[i];
        match &mut slot.code {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(&code.into());
            }
            None => slot.code = Some(code.into()),
        }
    }

    /// Attach a comment to slot `i`.
    pub fn set_comment(&mut self, i: usize, comment: impl Into<String>) {
        self.slots[i].comment = Some(comment.into());
    }

    /// Mark slot `i` as requiring a label before its code. Idempotent.
    pub fn require_label(&mut self, i: usize) {
        self.slots[i].needs_label = true;
    }

    /// True if slot `i` has been marked as a label target — used by branch
    /// emitters targeting an instruction that's already a fixup site.
    pub fn label_required(&self, i: usize) -> bool {
        self.slots[i].needs_label
    }

    /// The canonical label name for SBIL instruction `i`, whether or not it
    /// has been required yet.
    pub fn label_name(&self, i: usize) -> String {
        format!("{}_il_{i}", self.label_prefix)
    }

    /// The method's label prefix (used to build call/return sink names by
    /// the execution context, e.g. `{prefix}_end`, `{prefix}_inl`).
    pub fn label_prefix(&self) -> &str {
        &self.label_prefix
    }

    /// Assemble the full method body: preamble, then each slot (optional
    /// comment line, optional `label:` line, code), then postamble.
    pub fn assemble(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(comment) = &slot.comment {
                out.push_str("# ");
                out.push_str(comment);
                out.push('\n');
            }
            if slot.needs_label {
                out.push_str(&self.label_name(i));
                out.push_str(":\n");
            }
            if let Some(code) = &slot.code {
                out.push_str(code);
                out.push('\n');
            }
        }
        for line in &self.postamble {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_emits_label_before_code() {
        let mut w = OutputWriter::new("main", 1);
        w.set_code(0, "add r0 r0 r1");
        w.require_label(0);
        let text = w.assemble();
        assert_eq!(text, "main_il_0:\nadd r0 r0 r1\n");
    }

    #[test]
    fn require_label_is_idempotent() {
        let mut w = OutputWriter::new("main", 1);
        w.require_label(0);
        w.require_label(0);
        assert!(w.label_required(0));
        assert_eq!(w.assemble(), "main_il_0:\n");
    }

    #[test]
    fn preamble_and_postamble_bracket_the_body() {
        let mut w = OutputWriter::new("f", 1);
        w.push_preamble("pop r0");
        w.set_code(0, "ret r0");
        w.push_postamble("f_end:");
        assert_eq!(w.assemble(), "pop r0\nret r0\nf_end:\n");
    }
}
