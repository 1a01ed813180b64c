use serde::{Deserialize, Serialize};

/// Candidate flags attached to an event / signature by the selector.
///
/// Rendered as a stable pipe-joined string (`A|B|C|burst|cumulative|sampled`)
/// so the store and the evidence bundle serialize the same bytes regardless
/// of insertion order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFlags {
    pub a: bool,
    pub b: bool,
    pub c: bool,
    pub burst: bool,
    pub cumulative: bool,
    pub sampled: bool,
}

impl CandidateFlags {
    pub fn is_empty(&self) -> bool {
        !(self.a || self.b || self.c || self.burst || self.cumulative || self.sampled)
    }

    pub fn merge(&mut self, other: &CandidateFlags) {
        self.a |= other.a;
        self.b |= other.b;
        self.c |= other.c;
        self.burst |= other.burst;
        self.cumulative |= other.cumulative;
        self.sampled |= other.sampled;
    }

    /// Stable rendering; empty flags render as `None`.
    pub fn render(&self) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        if self.a {
            parts.push("A");
        }
        if self.b {
            parts.push("B");
        }
        if self.c {
            parts.push("C");
        }
        if self.burst {
            parts.push("burst");
        }
        if self.cumulative {
            parts.push("cumulative");
        }
        if self.sampled {
            parts.push("sampled");
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("|"))
        }
    }

    pub fn parse(raw: &str) -> Self {
        let mut flags = CandidateFlags::default();
        for part in raw.split('|') {
            match part {
                "A" => flags.a = true,
                "B" => flags.b = true,
                "C" => flags.c = true,
                "burst" => flags.burst = true,
                "cumulative" => flags.cumulative = true,
                "sampled" => flags.sampled = true,
                _ => {}
            }
        }
        flags
    }
}
