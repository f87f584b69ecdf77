//! Training Arguments - CLI configuration for training

use std::path::PathBuf;

use clap::Args;

use crate::config::JobParams;

/// Every option left unset keeps the value from `--config` (or its default).
#[derive(Args, Debug, Clone, Default)]
pub struct TrainArgs {
    /// JSON file with job parameters
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project root holding `data/` and `perl/`
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Checkpoints, metrics and predictions go here
    #[arg(long, default_value = "runs/babybert")]
    pub save_dir: PathBuf,

    /// Start over even if the save dir holds a checkpoint
    #[arg(long, action)]
    pub fresh: bool,

    #[arg(long)]
    pub corpus_name: Option<String>,

    #[arg(long)]
    pub vocab_size: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(long)]
    pub layers: Option<usize>,

    #[arg(long)]
    pub hidden_size: Option<usize>,

    #[arg(long)]
    pub heads: Option<usize>,

    #[arg(long)]
    pub max_steps: Option<usize>,

    #[arg(long)]
    pub eval_interval: Option<usize>,

    #[arg(long)]
    pub save_interval: Option<usize>,

    #[arg(long)]
    pub num_mlm_epochs: Option<usize>,

    #[arg(long)]
    pub num_srl_epochs: Option<usize>,

    /// Turn off interleaving (ramp or double-length schedule)
    #[arg(long, action)]
    pub no_interleave: bool,

    #[arg(long)]
    pub srl_probability: Option<f64>,

    #[arg(long)]
    pub srl_task_delay: Option<usize>,

    #[arg(long)]
    pub srl_task_ramp: Option<f64>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, action)]
    pub evaluate_train: bool,

    /// Probing task names (files under data/probing/)
    #[arg(long, value_delimiter = ',')]
    pub probing: Vec<String>,
}

impl TrainArgs {
    pub fn apply(&self, params: &mut JobParams) {
        macro_rules! set {
            ($($field:ident => $target:ident),* $(,)?) => {
                $(if let Some(v) = self.$field.clone() {
                    params.$target = v;
                })*
            };
        }
        set!(
            corpus_name => corpus_name,
            vocab_size => vocab_size,
            batch_size => batch_size,
            lr => lr,
            layers => num_layers,
            hidden_size => hidden_size,
            heads => num_attention_heads,
            max_steps => max_steps,
            eval_interval => eval_interval,
            save_interval => save_interval,
            num_mlm_epochs => num_mlm_epochs,
            num_srl_epochs => num_srl_epochs,
            srl_probability => srl_probability,
            seed => seed,
        );
        if self.srl_task_delay.is_some() {
            params.srl_task_delay = self.srl_task_delay;
        }
        if self.srl_task_ramp.is_some() {
            params.srl_task_ramp = self.srl_task_ramp;
        }
        if self.no_interleave {
            params.srl_interleaved = false;
        }
        if self.evaluate_train {
            params.evaluate_train = true;
        }
        if !self.probing.is_empty() {
            params.probing_names = self.probing.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use babybert_core::SrlPolicy;

    #[test]
    fn test_overrides_only_touch_given_fields() -> anyhow::Result<()> {
        let args = TrainArgs {
            batch_size: Some(8),
            layers: Some(2),
            no_interleave: true,
            srl_task_delay: Some(100),
            srl_task_ramp: Some(50.0),
            probing: vec!["agent_across_adjectives".into()],
            ..Default::default()
        };
        let mut params = JobParams::default();
        args.apply(&mut params);

        assert_eq!(params.batch_size, 8);
        assert_eq!(params.num_layers, 2);
        assert_eq!(params.hidden_size, JobParams::default().hidden_size);
        assert_eq!(params.probing_names, vec!["agent_across_adjectives"]);
        assert_eq!(
            params.policy()?,
            SrlPolicy::Ramp {
                delay: 100,
                ramp: 50.0
            }
        );
        Ok(())
    }
}
