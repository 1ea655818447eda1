use crate::types::RuleError;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    // 骰子表达式: NdM 加可选的 +K/-K
    static ref DICE_REGEX: Regex = Regex::new(r"^(\d+)d(\d+)([+-]\d+)?$").unwrap();
}

/// 骰子表达式,如 2d6+3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceExpr {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
}

impl DiceExpr {
    pub fn is_valid_notation(s: &str) -> bool {
        DICE_REGEX.is_match(s.trim())
    }

    pub fn min(&self) -> i64 {
        self.count as i64 + self.modifier as i64
    }

    pub fn max(&self) -> i64 {
        self.count as i64 * self.sides as i64 + self.modifier as i64
    }

    pub fn average(&self) -> f64 {
        self.count as f64 * (self.sides as f64 + 1.0) / 2.0 + self.modifier as f64
    }

    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        let rolled: i64 = (0..self.count)
            .map(|_| rng.gen_range(1..=self.sides) as i64)
            .sum();
        rolled + self.modifier as i64
    }
}

impl FromStr for DiceExpr {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DICE_REGEX
            .captures(s.trim())
            .ok_or_else(|| RuleError::ConfigError(format!("无效的骰子表达式: {}", s)))?;
        let parse = |m: &str| {
            m.parse::<i64>()
                .map_err(|_| RuleError::ConfigError(format!("骰子表达式数值越界: {}", s)))
        };
        let count = parse(&caps[1])?;
        let sides = parse(&caps[2])?;
        let modifier = caps.get(3).map(|m| parse(m.as_str())).transpose()?.unwrap_or(0);
        if sides == 0 {
            return Err(RuleError::ConfigError(format!("骰子面数不能为0: {}", s)));
        }
        Ok(Self {
            count: u32::try_from(count)
                .map_err(|_| RuleError::ConfigError(format!("骰子数量过大: {}", s)))?,
            sides: u32::try_from(sides)
                .map_err(|_| RuleError::ConfigError(format!("骰子面数过大: {}", s)))?,
            modifier: i32::try_from(modifier)
                .map_err(|_| RuleError::ConfigError(format!("骰子加值过大: {}", s)))?,
        })
    }
}

impl fmt::Display for DiceExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{}", m),
            m => write!(f, "{}", m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn parses_notation() {
        let d: DiceExpr = "2d6+3".parse().unwrap();
        assert_eq!((d.count, d.sides, d.modifier), (2, 6, 3));
        assert_eq!((d.min(), d.max()), (5, 15));
        assert_eq!(d.to_string(), "2d6+3");

        let d: DiceExpr = "1d20-1".parse().unwrap();
        assert_eq!(d.modifier, -1);

        assert!("d6".parse::<DiceExpr>().is_err());
        assert!("2d0".parse::<DiceExpr>().is_err());
        assert!("2d6 + 3".parse::<DiceExpr>().is_err());
    }

    #[test]
    fn rolls_stay_in_range() {
        let d: DiceExpr = "3d4-2".parse().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1_000 {
            let r = d.roll(&mut rng);
            assert!((d.min()..=d.max()).contains(&r));
        }
    }
}
