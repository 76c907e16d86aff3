//! Synthetic bank-customer table shaped like the cleaned churn dataset.
//!
//! Used for demos (`kolosal-churn sample`), benchmarks and tests. Labels are
//! assigned to the highest-risk rows so the positive rate is exact.

use crate::error::{KolosalError, Result};
use polars::prelude::*;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Label column of the generated table
pub const LABEL_COLUMN: &str = "Exited";

/// Generate `n_rows` customers with `positive_rate` of them churned.
pub fn generate_bank_churn(n_rows: usize, positive_rate: f64, seed: u64) -> Result<DataFrame> {
    if n_rows == 0 {
        return Err(KolosalError::InvalidParameter {
            name: "n_rows".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&positive_rate) {
        return Err(KolosalError::InvalidParameter {
            name: "positive_rate".to_string(),
            value: positive_rate.to_string(),
            reason: "must be in [0, 1]".to_string(),
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut credit_score = Vec::with_capacity(n_rows);
    let mut age = Vec::with_capacity(n_rows);
    let mut tenure = Vec::with_capacity(n_rows);
    let mut balance = Vec::with_capacity(n_rows);
    let mut num_products = Vec::with_capacity(n_rows);
    let mut has_card = Vec::with_capacity(n_rows);
    let mut active = Vec::with_capacity(n_rows);
    let mut salary = Vec::with_capacity(n_rows);
    let mut geo_france = Vec::with_capacity(n_rows);
    let mut geo_germany = Vec::with_capacity(n_rows);
    let mut geo_spain = Vec::with_capacity(n_rows);
    let mut gender_female = Vec::with_capacity(n_rows);
    let mut gender_male = Vec::with_capacity(n_rows);
    let mut risk = Vec::with_capacity(n_rows);

    for _ in 0..n_rows {
        let cs: i64 = rng.gen_range(350..=850);
        let a: i64 = 18 + (rng.gen::<f64>().powf(1.6) * 74.0) as i64;
        let t: i64 = rng.gen_range(0..=10);
        let b: f64 = if rng.gen_bool(0.36) {
            0.0
        } else {
            (rng.gen_range(40_000.0..210_000.0_f64) * 100.0).round() / 100.0
        };
        let np: i64 = match rng.gen::<f64>() {
            p if p < 0.50 => 1,
            p if p < 0.96 => 2,
            p if p < 0.99 => 3,
            _ => 4,
        };
        let card = rng.gen_bool(0.70);
        let act = rng.gen_bool(0.52);
        let sal: f64 = (rng.gen_range(11.0..200_000.0_f64) * 100.0).round() / 100.0;
        let geo = rng.gen::<f64>();
        let (fr, de, es) = if geo < 0.50 {
            (true, false, false)
        } else if geo < 0.75 {
            (false, true, false)
        } else {
            (false, false, true)
        };
        let female = rng.gen_bool(0.45);

        let score = 0.065 * (a as f64 - 40.0)
            + if de { 0.75 } else { 0.0 }
            + if act { -0.9 } else { 0.0 }
            + if female { 0.5 } else { 0.0 }
            + if b > 0.0 { 0.3 } else { 0.0 }
            + match np {
                1 => 0.2,
                2 => -1.2,
                _ => 2.5,
            }
            - 0.0007 * (cs as f64 - 650.0)
            + rng.gen_range(-1.5..1.5);

        credit_score.push(cs);
        age.push(a);
        tenure.push(t);
        balance.push(b);
        num_products.push(np);
        has_card.push(card as i64);
        active.push(act as i64);
        salary.push(sal);
        geo_france.push(fr);
        geo_germany.push(de);
        geo_spain.push(es);
        gender_female.push(female);
        gender_male.push(!female);
        risk.push(score);
    }

    let n_positive = (positive_rate * n_rows as f64).round() as usize;
    let mut order: Vec<usize> = (0..n_rows).collect();
    order.sort_by(|&i, &j| risk[j].partial_cmp(&risk[i]).unwrap_or(std::cmp::Ordering::Equal));
    let mut exited = vec![0i64; n_rows];
    for &i in order.iter().take(n_positive) {
        exited[i] = 1;
    }

    let df = df!(
        "CreditScore" => credit_score,
        "Age" => age,
        "Tenure" => tenure,
        "Balance" => balance,
        "NumOfProducts" => num_products,
        "HasCrCard" => has_card,
        "IsActiveMember" => active,
        "EstimatedSalary" => salary,
        "Geography_France" => geo_france,
        "Geography_Germany" => geo_germany,
        "Geography_Spain" => geo_spain,
        "Gender_Female" => gender_female,
        "Gender_Male" => gender_male,
        LABEL_COLUMN => exited
    )?;

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_rate() {
        let df = generate_bank_churn(1000, 0.2, 1).unwrap();
        assert_eq!(df.height(), 1000);
        assert_eq!(df.width(), 14);

        let positives: i64 = df
            .column(LABEL_COLUMN)
            .unwrap()
            .as_materialized_series()
            .i64()
            .unwrap()
            .sum()
            .unwrap();
        assert_eq!(positives, 200);
    }

    #[test]
    fn test_deterministic() {
        let a = generate_bank_churn(200, 0.2, 9).unwrap();
        let b = generate_bank_churn(200, 0.2, 9).unwrap();
        assert!(a.equals(&b));
    }

    #[test]
    fn test_invalid_rate() {
        assert!(generate_bank_churn(10, 1.5, 0).is_err());
        assert!(generate_bank_churn(0, 0.2, 0).is_err());
    }
}
