//! Pipeline - Corpus files to batches and output vocabularies
//!
//! Shared by `train` and `evaluate`, so both see the same split, the same
//! masking and the same label indices for a given set of parameters.

use anyhow::{Context, Result};
use babybert_core::batch::{mlm_batches, srl_batches};
use babybert_core::{
    load_propositions, load_utterances, split, LabelVocab, MlmBatch, MlmConverter, MlmInstance,
    SrlBatch, SrlConverter, SrlInstance, WordPieceTokenizer,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::{JobParams, ProjectPaths};

pub struct JobData {
    pub tokenizer: WordPieceTokenizer,
    pub output_vocab: LabelVocab,
    pub tag_vocab: LabelVocab,
    pub mlm_train: Vec<MlmBatch>,
    pub mlm_devel: Vec<MlmBatch>,
    pub mlm_test: Vec<MlmBatch>,
    pub srl_train: Vec<SrlBatch>,
    pub srl_devel: Vec<SrlBatch>,
}

impl JobData {
    pub fn prepare(params: &JobParams, paths: &ProjectPaths) -> Result<Self> {
        let data_config = params.data_config()?;

        let vocab_path = paths.vocab_file(&params.corpus_name, params.vocab_size);
        let tokenizer = WordPieceTokenizer::from_vocab_file(&vocab_path).with_context(|| {
            format!("Missing input vocabulary {:?} (run `babybert vocab` first)", vocab_path)
        })?;
        info!("Tokenizer loaded. Vocab Size: {}", tokenizer.vocab_size());

        let utterances = load_utterances(paths.mlm_corpus(&params.corpus_name), &data_config)?;
        let propositions = load_propositions(paths.srl_corpus(&params.corpus_name), &data_config)?;

        info!("Splitting utterances");
        let utterances = split(utterances, data_config.train_prob, data_config.seed);
        info!("Splitting propositions");
        let propositions = split(propositions, data_config.train_prob, data_config.seed);

        let mut rng = StdRng::seed_from_u64(data_config.seed);
        let mlm = MlmConverter::new(&tokenizer, &data_config);
        let mlm_train = mlm.convert_all(&utterances.train, &mut rng)?;
        let mlm_devel = mlm.convert_all(&utterances.devel, &mut rng)?;
        let mlm_test = mlm.convert_all(&utterances.test, &mut rng)?;

        let srl = SrlConverter::new(&tokenizer, &data_config);
        let srl_train = srl.convert_all(&propositions.train)?;
        let srl_devel = srl.convert_all(&propositions.devel)?;

        let output_vocab = output_vocab(&mlm_train, &mlm_devel);
        output_vocab.print_statistics("mlm_tags");
        let tag_vocab = tag_vocab(&srl_train, &srl_devel);
        tag_vocab.print_statistics("srl_tags");

        let batch_size = params.batch_size;
        Ok(Self {
            mlm_train: mlm_batches(&mlm_train, batch_size, &output_vocab),
            mlm_devel: mlm_batches(&mlm_devel, batch_size, &output_vocab),
            mlm_test: mlm_batches(&mlm_test, batch_size, &output_vocab),
            srl_train: srl_batches(&srl_train, batch_size, &tag_vocab),
            srl_devel: srl_batches(&srl_devel, batch_size, &tag_vocab),
            tokenizer,
            output_vocab,
            tag_vocab,
        })
    }
}

/// Padded namespace over every content piece of the train and devel instances.
pub fn output_vocab(train: &[MlmInstance], devel: &[MlmInstance]) -> LabelVocab {
    LabelVocab::padded(
        train
            .iter()
            .chain(devel)
            .flat_map(|i| i.content_tokens().iter().cloned()),
    )
}

pub fn tag_vocab(train: &[SrlInstance], devel: &[SrlInstance]) -> LabelVocab {
    LabelVocab::non_padded(train.iter().chain(devel).flat_map(|i| i.tags.iter().cloned()))
}
