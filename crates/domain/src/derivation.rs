//! Derivation formulas: pure arithmetic over already-resolved operands.

use serde_json::{Map, Value};

/// Watts-to-kilowatts divisor applied to raw power readings.
pub const WATTS_PER_KILOWATT: f64 = 1000.0;

/// Sentinel published when the main power reading is missing or zero.
pub const NOT_AVAILABLE: &str = "N/A";

/// Sentinel published when main power is known but no load is drawn.
pub const ZERO_LOAD: &str = "ZERO_LOAD";

/// Output of the cost formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    pub power: f64,
    pub energy_kwh: f64,
    pub cost_a: f64,
    pub cost_b: f64,
}

impl CostBreakdown {
    /// Apply both tariffs to a raw power reading in watts.
    #[must_use]
    pub fn compute(power: f64, rate_a: f64, rate_b: f64) -> Self {
        let energy_kwh = power / WATTS_PER_KILOWATT;
        Self {
            power,
            energy_kwh,
            cost_a: energy_kwh * rate_a,
            cost_b: energy_kwh * rate_b,
        }
    }

    /// Fields carried in the published `value`.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("power".to_string(), Value::from(self.power));
        fields.insert("energy_kwh".to_string(), Value::from(self.energy_kwh));
        fields.insert("cost_a".to_string(), Value::from(self.cost_a));
        fields.insert("cost_b".to_string(), Value::from(self.cost_b));
        fields
    }
}

/// The ratio part of an efficiency evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Efficiency {
    /// `main / total_load`.
    Ratio(f64),
    /// Main power is unknown or zero; the ratio is undefined.
    NotAvailable,
    /// Main power is known but the aggregated load is not positive. A
    /// negative sum (meters reporting export) also lands here, since no
    /// meaningful ratio exists.
    ZeroLoad,
}

impl Efficiency {
    /// Status tag published alongside the value.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::Ratio(_) => "ok",
            Self::NotAvailable => "not_available",
            Self::ZeroLoad => "zero_load",
        }
    }

    fn to_value(self) -> Value {
        match self {
            Self::Ratio(ratio) => Value::from(ratio),
            Self::NotAvailable => Value::from(NOT_AVAILABLE),
            Self::ZeroLoad => Value::from(ZERO_LOAD),
        }
    }
}

/// Output of the efficiency formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficiencyReading {
    pub efficiency: Efficiency,
    pub main_power: Option<f64>,
    pub total_load: f64,
    /// Number of load terms that contributed to `total_load`.
    pub load_terms: usize,
}

impl EfficiencyReading {
    /// Combine the main reading with per-term sums.
    ///
    /// `terms` holds one entry per configured load term; `None` marks a term
    /// that is excluded (no cached device, or none of its keys present).
    /// A `total_load` of zero or below yields [`Efficiency::ZeroLoad`].
    #[must_use]
    pub fn compute(main_power: Option<f64>, terms: &[Option<f64>]) -> Self {
        let included: Vec<f64> = terms.iter().filter_map(|term| *term).collect();
        let total_load: f64 = included.iter().sum();

        let efficiency = match main_power {
            None => Efficiency::NotAvailable,
            Some(main) if main == 0.0 => Efficiency::NotAvailable,
            Some(main) if total_load > 0.0 => Efficiency::Ratio(main / total_load),
            Some(_) => Efficiency::ZeroLoad,
        };

        Self {
            efficiency,
            main_power,
            total_load,
            load_terms: included.len(),
        }
    }

    /// Fields carried in the published `value`.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("pue".to_string(), self.efficiency.to_value());
        fields.insert(
            "status".to_string(),
            Value::from(self.efficiency.status()),
        );
        fields.insert(
            "main_power".to_string(),
            self.main_power.map_or(Value::Null, Value::from),
        );
        fields.insert("total_load".to_string(), Value::from(self.total_load));
        fields.insert("load_terms".to_string(), Value::from(self.load_terms));
        fields
    }
}

/// Sum the numeric operands of one load term.
///
/// Returns `None` when none of the operands is present, so the term is
/// excluded rather than counted as zero.
#[must_use]
pub fn sum_present(operands: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    operands
        .into_iter()
        .flatten()
        .fold(None, |acc, value| Some(acc.unwrap_or(0.0) + value))
}
