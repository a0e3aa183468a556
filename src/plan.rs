//! Attack-phase planning.
//!
//! A brute-force request (charset selection, length range, strategy) is
//! decomposed into an ordered list of phases, each one invocation of the
//! GPU cracker with a fixed charset, mask and length range. Plans are pure
//! data: identical inputs always produce byte-identical plans, which is
//! what makes checkpoint resume reproducible.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::CrackError;

/// Hashcat-compatible charset tokens.
const TOKEN_DIGITS: &str = "?d";
const TOKEN_LOWER: &str = "?l";
const TOKEN_UPPER: &str = "?u";
const TOKEN_SPECIAL: &str = "?s";

/// The literal characters behind `?s` (hashcat's 33 printable specials).
pub const SPECIAL_CHARS: &str = " !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Which character classes the user enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharsetSelection {
    pub numbers: bool,
    pub lower: bool,
    pub upper: bool,
    pub special: bool,
}

impl CharsetSelection {
    pub fn any(&self) -> bool {
        self.numbers || self.lower || self.upper || self.special
    }

    /// The selection as concatenated mask tokens, in `?d?l?u?s` order.
    pub fn tokens(&self) -> String {
        let mut out = String::new();
        if self.numbers {
            out.push_str(TOKEN_DIGITS);
        }
        if self.lower {
            out.push_str(TOKEN_LOWER);
        }
        if self.upper {
            out.push_str(TOKEN_UPPER);
        }
        if self.special {
            out.push_str(TOKEN_SPECIAL);
        }
        out
    }

    /// The literal alphabet for the CPU brute-force generator.
    pub fn alphabet(&self) -> String {
        let mut out = String::new();
        if self.numbers {
            out.extend('0'..='9');
        }
        if self.lower {
            out.extend('a'..='z');
        }
        if self.upper {
            out.extend('A'..='Z');
        }
        if self.special {
            out.push_str(SPECIAL_CHARS);
        }
        out
    }
}

/// Phase ordering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// One phase per length over the full selected charset.
    LengthFirst,
    /// One phase per pattern family, each over the full length range.
    PatternFirst,
    /// Short/medium/long rounds with charsets growing per round.
    SmartMix,
    /// Likely human patterns first (PINs, short digits, words), then a
    /// full sweep.
    CommonFirst,
}

/// One GPU-cracker invocation: fixed charset, mask and length range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    /// Concatenated mask tokens; multi-token charsets are passed to the
    /// cracker as custom charset 1.
    pub charset: String,
    /// Mask at `max_len` positions; shorter lengths come from increment
    /// mode.
    pub mask: String,
    pub min_len: u32,
    pub max_len: u32,
}

impl Phase {
    fn new(name: impl Into<String>, tokens: &str, min_len: u32, max_len: u32) -> Self {
        let position = if token_count(tokens) == 1 { tokens.to_string() } else { "?1".to_string() };
        Self {
            name: name.into(),
            charset: tokens.to_string(),
            mask: position.repeat(max_len as usize),
            min_len,
            max_len,
        }
    }

    /// True when the mask needs a `-1 <charset>` declaration.
    pub fn needs_custom_charset(&self) -> bool {
        token_count(&self.charset) > 1
    }

    /// Number of distinct characters this phase draws from.
    pub fn charset_size(&self) -> u64 {
        let mut size = 0u64;
        let mut rest = self.charset.as_str();
        while let Some(stripped) = rest.strip_prefix('?') {
            let (class, tail) = stripped.split_at(1);
            size += match class {
                "d" => 10,
                "l" | "u" => 26,
                "s" => SPECIAL_CHARS.len() as u64,
                _ => 0,
            };
            rest = tail;
        }
        size
    }

    /// Candidate count over the phase's length range, saturating.
    pub fn keyspace(&self) -> u64 {
        let base = self.charset_size();
        let mut total = 0u64;
        for len in self.min_len..=self.max_len {
            total = total.saturating_add(base.saturating_pow(len));
        }
        total
    }
}

fn token_count(tokens: &str) -> usize {
    tokens.matches('?').count()
}

/// A brute-force request as the user states it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub charsets: CharsetSelection,
    pub min_len: u32,
    pub max_len: u32,
    pub strategy: Strategy,
}

/// Immutable ordered phase list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackPlan {
    pub request: PlanRequest,
    pub phases: Vec<Phase>,
}

impl AttackPlan {
    /// Builds the plan. Fails on an empty charset selection or an invalid
    /// length range (lengths are bounded to 1..=10).
    pub fn build(request: PlanRequest) -> Result<Self, CrackError> {
        if !request.charsets.any() {
            return Err(CrackError::Config("at least one character class must be enabled".into()));
        }
        if request.min_len < 1 || request.max_len > 10 || request.min_len > request.max_len {
            return Err(CrackError::Config(format!(
                "invalid length range {}..={} (expected within 1..=10)",
                request.min_len, request.max_len
            )));
        }

        let phases = match request.strategy {
            Strategy::LengthFirst => plan_length_first(&request),
            Strategy::PatternFirst => plan_pattern_first(&request),
            Strategy::SmartMix => plan_smart_mix(&request),
            Strategy::CommonFirst => plan_common_first(&request),
        };
        debug_assert!(phases.iter().all(|p| p.min_len <= p.max_len && p.min_len >= 1));
        Ok(Self { request, phases })
    }

    /// Total brute-force keyspace across all phases, saturating.
    pub fn total_keyspace(&self) -> u64 {
        self.phases.iter().fold(0u64, |acc, p| acc.saturating_add(p.keyspace()))
    }

    /// Stable identity of this plan, used to key checkpoint monotonicity.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self).expect("plan serializes"));
        let digest = hasher.finalize();
        digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Clamps `[lo, hi]` to the request's range; `None` when they do not
/// intersect. The planner never emits empty ranges.
fn clamp(lo: u32, hi: u32, request: &PlanRequest) -> Option<(u32, u32)> {
    let lo = lo.max(request.min_len);
    let hi = hi.min(request.max_len);
    (lo <= hi).then_some((lo, hi))
}

fn plan_length_first(request: &PlanRequest) -> Vec<Phase> {
    let tokens = request.charsets.tokens();
    (request.min_len..=request.max_len)
        .map(|len| Phase::new(format!("length-{len}"), &tokens, len, len))
        .collect()
}

fn plan_pattern_first(request: &PlanRequest) -> Vec<Phase> {
    let sel = request.charsets;
    // (name, tokens, enabled) in fixed escalation order.
    let families: [(&str, String, bool); 8] = [
        ("digits", TOKEN_DIGITS.into(), sel.numbers),
        ("lowercase", TOKEN_LOWER.into(), sel.lower),
        ("uppercase", TOKEN_UPPER.into(), sel.upper),
        ("digits-lower", format!("{TOKEN_DIGITS}{TOKEN_LOWER}"), sel.numbers && sel.lower),
        ("digits-upper", format!("{TOKEN_DIGITS}{TOKEN_UPPER}"), sel.numbers && sel.upper),
        ("letters", format!("{TOKEN_LOWER}{TOKEN_UPPER}"), sel.lower && sel.upper),
        (
            "alphanumeric",
            format!("{TOKEN_DIGITS}{TOKEN_LOWER}{TOKEN_UPPER}"),
            sel.numbers && sel.lower && sel.upper,
        ),
        ("full-charset", sel.tokens(), sel.special),
    ];
    families
        .into_iter()
        .filter(|(_, _, enabled)| *enabled)
        .map(|(name, tokens, _)| Phase::new(name, &tokens, request.min_len, request.max_len))
        .collect()
}

fn plan_smart_mix(request: &PlanRequest) -> Vec<Phase> {
    let sel = request.charsets;
    let full = sel.tokens();
    let mut phases = Vec::new();

    // Round 1: short lengths across the simple (single-class) charsets.
    if let Some((lo, hi)) = clamp(1, 3, request) {
        let singles: [(&str, &str, bool); 4] = [
            ("short-digits", TOKEN_DIGITS, sel.numbers),
            ("short-lower", TOKEN_LOWER, sel.lower),
            ("short-upper", TOKEN_UPPER, sel.upper),
            ("short-special", TOKEN_SPECIAL, sel.special),
        ];
        for (name, tokens, enabled) in singles {
            if enabled {
                phases.push(Phase::new(name, tokens, lo, hi));
            }
        }
    }

    // Round 2: medium lengths, starting with digits (PIN codes) and
    // growing towards the full selection.
    if let Some((lo, hi)) = clamp(4, 6, request) {
        if sel.numbers {
            phases.push(Phase::new("pin-codes", TOKEN_DIGITS, lo, hi));
        }
        if sel.numbers && sel.lower {
            let tokens = format!("{TOKEN_DIGITS}{TOKEN_LOWER}");
            phases.push(Phase::new("medium-digits-lower", &tokens, lo, hi));
        }
        if full != TOKEN_DIGITS {
            phases.push(Phase::new("medium-full", &full, lo, hi));
        }
    }

    // Round 3: long lengths, ending with the full charset.
    if let Some((lo, hi)) = clamp(7, request.max_len, request) {
        phases.push(Phase::new("long-full", &full, lo, hi));
    }

    phases
}

fn plan_common_first(request: &PlanRequest) -> Vec<Phase> {
    let sel = request.charsets;
    let mut phases = Vec::new();

    if sel.numbers {
        if let Some((lo, hi)) = clamp(4, 6, request) {
            phases.push(Phase::new("pin-codes", TOKEN_DIGITS, lo, hi));
        }
        if let Some((lo, hi)) = clamp(1, 3, request) {
            phases.push(Phase::new("short-digits", TOKEN_DIGITS, lo, hi));
        }
    }
    if let Some((lo, hi)) = clamp(6, 8, request) {
        if sel.lower {
            phases.push(Phase::new("words-lower", TOKEN_LOWER, lo, hi));
        }
        if sel.upper {
            phases.push(Phase::new("words-upper", TOKEN_UPPER, lo, hi));
        }
    }
    if sel.numbers && sel.lower {
        if let Some((lo, hi)) = clamp(4, 8, request) {
            let tokens = format!("{TOKEN_DIGITS}{TOKEN_LOWER}");
            phases.push(Phase::new("digits-lower", &tokens, lo, hi));
        }
    }
    phases.push(Phase::new(
        "full-sweep",
        &sel.tokens(),
        request.min_len,
        request.max_len,
    ));
    phases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digits_only() -> CharsetSelection {
        CharsetSelection { numbers: true, lower: false, upper: false, special: false }
    }

    fn all_classes() -> CharsetSelection {
        CharsetSelection { numbers: true, lower: true, upper: true, special: true }
    }

    #[test]
    fn length_first_digits_one_to_three() {
        let plan = AttackPlan::build(PlanRequest {
            charsets: digits_only(),
            min_len: 1,
            max_len: 3,
            strategy: Strategy::LengthFirst,
        })
        .unwrap();
        let masks: Vec<&str> = plan.phases.iter().map(|p| p.mask.as_str()).collect();
        assert_eq!(masks, vec!["?d", "?d?d", "?d?d?d"]);
        for (i, phase) in plan.phases.iter().enumerate() {
            assert_eq!(phase.min_len, i as u32 + 1);
            assert_eq!(phase.max_len, i as u32 + 1);
            assert!(!phase.needs_custom_charset());
        }
        assert_eq!(plan.total_keyspace(), 10 + 100 + 1000);
    }

    #[test]
    fn multi_class_phases_use_custom_charset() {
        let plan = AttackPlan::build(PlanRequest {
            charsets: CharsetSelection { numbers: true, lower: true, upper: false, special: false },
            min_len: 2,
            max_len: 2,
            strategy: Strategy::LengthFirst,
        })
        .unwrap();
        let phase = &plan.phases[0];
        assert_eq!(phase.charset, "?d?l");
        assert_eq!(phase.mask, "?1?1");
        assert!(phase.needs_custom_charset());
        assert_eq!(phase.keyspace(), 36 * 36);
    }

    #[test]
    fn plans_are_deterministic() {
        let request = PlanRequest {
            charsets: all_classes(),
            min_len: 1,
            max_len: 8,
            strategy: Strategy::SmartMix,
        };
        let a = AttackPlan::build(request).unwrap();
        let b = AttackPlan::build(request).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn pattern_first_family_order() {
        let plan = AttackPlan::build(PlanRequest {
            charsets: all_classes(),
            min_len: 1,
            max_len: 4,
            strategy: Strategy::PatternFirst,
        })
        .unwrap();
        let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "digits",
                "lowercase",
                "uppercase",
                "digits-lower",
                "digits-upper",
                "letters",
                "alphanumeric",
                "full-charset"
            ]
        );
        for phase in &plan.phases {
            assert_eq!((phase.min_len, phase.max_len), (1, 4));
        }
    }

    #[test]
    fn pattern_first_skips_disabled_families() {
        let plan = AttackPlan::build(PlanRequest {
            charsets: digits_only(),
            min_len: 1,
            max_len: 2,
            strategy: Strategy::PatternFirst,
        })
        .unwrap();
        let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["digits"]);
    }

    #[test]
    fn smart_mix_emits_only_intersecting_rounds() {
        // Range 5..=6 intersects only the medium round.
        let plan = AttackPlan::build(PlanRequest {
            charsets: digits_only(),
            min_len: 5,
            max_len: 6,
            strategy: Strategy::SmartMix,
        })
        .unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].name, "pin-codes");
        assert_eq!((plan.phases[0].min_len, plan.phases[0].max_len), (5, 6));
    }

    #[test]
    fn smart_mix_long_round_reaches_max_len() {
        let plan = AttackPlan::build(PlanRequest {
            charsets: all_classes(),
            min_len: 1,
            max_len: 9,
            strategy: Strategy::SmartMix,
        })
        .unwrap();
        let last = plan.phases.last().unwrap();
        assert_eq!(last.name, "long-full");
        assert_eq!((last.min_len, last.max_len), (7, 9));
    }

    #[test]
    fn common_first_ends_with_full_sweep() {
        let plan = AttackPlan::build(PlanRequest {
            charsets: all_classes(),
            min_len: 1,
            max_len: 10,
            strategy: Strategy::CommonFirst,
        })
        .unwrap();
        let names: Vec<&str> = plan.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["pin-codes", "short-digits", "words-lower", "words-upper", "digits-lower", "full-sweep"]
        );
        let last = plan.phases.last().unwrap();
        assert_eq!((last.min_len, last.max_len), (1, 10));
    }

    #[test]
    fn no_empty_ranges_anywhere() {
        for strategy in [Strategy::LengthFirst, Strategy::PatternFirst, Strategy::SmartMix, Strategy::CommonFirst] {
            for (min_len, max_len) in [(1, 1), (1, 10), (4, 4), (9, 10)] {
                let plan = AttackPlan::build(PlanRequest {
                    charsets: all_classes(),
                    min_len,
                    max_len,
                    strategy,
                })
                .unwrap();
                assert!(!plan.phases.is_empty(), "{strategy:?} {min_len}..{max_len}");
                for phase in &plan.phases {
                    assert!(phase.min_len >= min_len && phase.max_len <= max_len);
                    assert!(phase.min_len <= phase.max_len);
                    assert!(phase.keyspace() > 0);
                }
            }
        }
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let mut request = PlanRequest {
            charsets: CharsetSelection { numbers: false, lower: false, upper: false, special: false },
            min_len: 1,
            max_len: 4,
            strategy: Strategy::LengthFirst,
        };
        assert!(AttackPlan::build(request).is_err());
        request.charsets.numbers = true;
        request.min_len = 0;
        assert!(AttackPlan::build(request).is_err());
        request.min_len = 5;
        request.max_len = 4;
        assert!(AttackPlan::build(request).is_err());
        request.max_len = 11;
        assert!(AttackPlan::build(request).is_err());
    }
}
