//! Built-in searches: CLIP few-shot fine-tuning and multi-area DeepLabv3+
//! segmentation training.

use std::path::PathBuf;

use gt_optimizer::{Mode, ResourceRequest, SearchKind, SearchSpace};
use gt_types::{validation_error, GtResult, OVERALL_MIOU, TOP_1_ACCURACY};

use crate::config::{expand_home, ExperimentSection, PathsSection, TuneFile};
use crate::plan::{
    DataStaging, MetricSource, OverrideRule, ParameterBinding, TrialPlan, DEFAULT_STDOUT_FILE,
};

pub const PRESET_NAMES: [&str; 2] = ["clip", "deeplab"];

/// DeepLabv3+ backbone settings files searched by the `deeplab` preset.
pub const DEEPLAB_BACKBONES: [&str; 9] = [
    "deeplabv3plus_xception65.ini",
    "deeplabv3plus_xception41.ini",
    "deeplabv3plus_xception71.ini",
    "deeplabv3plus_resnet_v1_50_beta.ini",
    "deeplabv3plus_resnet_v1_101_beta.ini",
    "deeplabv3plus_mobilenetv2_coco_voc_trainval.ini",
    "deeplabv3plus_mobilenetv3_large_cityscapes_trainfine.ini",
    "deeplabv3plus_mobilenetv3_small_cityscapes_trainfine.ini",
    "deeplabv3plus_EdgeTPU-DeepLab.ini",
];

/// Per-area settings copied into every DeepLab trial.
pub const AREA_INI_FILES: [&str; 6] = [
    "area_Willow_River.ini",
    "area_Banks_east.ini",
    "area_Ellesmere_Island.ini",
    "area_Willow_River_nirGB.ini",
    "area_Banks_east_nirGB.ini",
    "area_Ellesmere_Island_nirGB.ini",
];

pub const CLIP_MODEL_TYPES: [&str; 8] = [
    "RN50",
    "RN101",
    "RN50x4",
    "RN50x16",
    "ViT-B/32",
    "ViT-B/16",
    "ViT-L/14",
    "ViT-L/14@336px",
];

fn binding(param: &str, file: &str, key: &str) -> ParameterBinding {
    ParameterBinding {
        param: param.to_string(),
        file: file.to_string(),
        key: key.to_string(),
    }
}

/// Look up a preset by name.
pub fn preset(name: &str) -> GtResult<TuneFile> {
    match name {
        "clip" => Ok(clip()),
        "deeplab" => Ok(deeplab()),
        other => Err(validation_error!(
            "unknown preset '{}', expected one of {}",
            other,
            PRESET_NAMES.join(", ")
        )),
    }
}

/// Grid over learning rate, epochs and model type for CLIP fine-tuning.
/// Trials need `finetune_clip.sh` and `training_data/` in the template directory.
pub fn clip() -> TuneFile {
    let space = SearchSpace::new()
        .add_choice("lr", [1e-5, 1e-4, 5e-5])
        .add_choice("epoch_num", [100_i64, 200, 300, 500])
        .add_choice("model_type", CLIP_MODEL_TYPES)
        .add_choice("samp_count", [150_i64]);

    TuneFile {
        experiment: ExperimentSection {
            name: "tune_clip_para".to_string(),
            metric: TOP_1_ACCURACY.to_string(),
            mode: Mode::Max,
            search: SearchKind::Grid,
            num_samples: 1,
            max_concurrent: 1,
            resources: None,
            seed: None,
        },
        paths: PathsSection {
            template_dir: expand_home(&PathBuf::from("~/Data/slump_demdiff_classify/ini_files")),
            data_dir: None,
            results_dir: PathBuf::from("./ray_results"),
        },
        parameters: space.parameters,
        plan: TrialPlan {
            trial_prefix: "clip_tuning".to_string(),
            report_prefix: "top1_acc".to_string(),
            template_files: vec![
                "main_para.ini".to_string(),
                "model_clip.ini".to_string(),
                "s2_rgb_ini_files.txt".to_string(),
                "finetune_clip.sh".to_string(),
            ],
            data: DataStaging::Directory {
                name: "training_data".to_string(),
            },
            bindings: vec![
                binding("lr", "model_clip.ini", "base_learning_rate"),
                binding("epoch_num", "model_clip.ini", "train_epoch_num"),
                binding("model_type", "model_clip.ini", "model_type"),
                binding("samp_count", "main_para.ini", "a_few_shot_samp_count"),
            ],
            overrides: Vec::new(),
            command: "./finetune_clip.sh".to_string(),
            stdout_file: DEFAULT_STDOUT_FILE.to_string(),
            metric: MetricSource::Top1Accuracy {
                log_file: "accuracy_log.txt".to_string(),
                sample_counts: true,
            },
            cleanup: vec!["exp11".to_string()],
        },
    }
}

/// Grid over learning rate, batch size and backbone for multi-area DeepLabv3+
/// training, three GPUs per trial.
pub fn deeplab() -> TuneFile {
    let space = SearchSpace::new()
        .add_choice("lr", [0.0001, 0.007, 0.014, 0.021, 0.28])
        .add_choice("iter_num", [30000_i64])
        .add_choice("batch_size", [8_i64, 16, 32, 48, 64, 96])
        .add_choice("backbone", DEEPLAB_BACKBONES)
        .add_choice("buffer_size", [300_i64])
        .add_choice("training_data_per", [0.9])
        .add_choice("data_augmentation", ["blur,crop,bright,contrast,noise"])
        .add_choice("data_aug_ignore_classes", ["class_0"]);

    let para_file = "main_para_exp9.ini";
    let mut template_files = vec![para_file.to_string(), "{backbone}".to_string()];
    template_files.extend(AREA_INI_FILES.iter().map(|s| s.to_string()));

    TuneFile {
        experiment: ExperimentSection {
            name: "tune_backbone_para_tesia_v2".to_string(),
            metric: OVERALL_MIOU.to_string(),
            mode: Mode::Max,
            search: SearchKind::Grid,
            num_samples: 1,
            max_concurrent: 1,
            resources: Some(ResourceRequest { cpus: 0, gpus: 3 }),
            seed: None,
        },
        paths: PathsSection {
            template_dir: expand_home(&PathBuf::from(
                "~/Data/Arctic/canada_arctic/autoMapping/ini_files",
            )),
            data_dir: Some(expand_home(&PathBuf::from(
                "~/Data/Arctic/canada_arctic/autoMapping/training_find_tune_data",
            ))),
            results_dir: PathBuf::from("./ray_results"),
        },
        parameters: space.parameters,
        plan: TrialPlan {
            trial_prefix: "multiArea_deeplabv3P".to_string(),
            report_prefix: "training_miou".to_string(),
            template_files,
            data: DataStaging::Prefixed {
                prefixes: ["sub", "split", "list", "tfrecord"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            bindings: vec![
                binding("backbone", para_file, "network_setting_ini"),
                binding("lr", "{backbone}", "base_learning_rate"),
                binding("batch_size", "{backbone}", "batch_size"),
                binding("iter_num", "{backbone}", "iteration_num"),
                binding("buffer_size", para_file, "buffer_size"),
                binding("training_data_per", para_file, "training_data_per"),
                binding("data_augmentation", para_file, "data_augmentation"),
                binding("data_aug_ignore_classes", para_file, "data_aug_ignore_classes"),
            ],
            overrides: vec![OverrideRule {
                param: "backbone".to_string(),
                contains: vec![
                    "mobilenetv2".to_string(),
                    "mobilenetv3".to_string(),
                    "EdgeTPU".to_string(),
                ],
                file: para_file.to_string(),
                key: "b_initialize_last_layer".to_string(),
                value: "No".to_string(),
            }],
            command: format!(
                "python \"${{LANDUSE_DL_DIR:-$HOME/codes/PycharmProjects/Landuse_DL}}/workflow/whole_procedure.py\" {para_file} --train-only"
            ),
            stdout_file: DEFAULT_STDOUT_FILE.to_string(),
            metric: MetricSource::OverallMiou {
                para_file: para_file.to_string(),
                eval_file: "eval/miou.txt".to_string(),
            },
            cleanup: [
                "exp*/init_models",
                "exp*/eval/events.out.tfevents*",
                "exp*/vis",
                "multi_inf_results",
                "split*",
                "sub*s",
                "sub*s_delete",
                "tfrecord*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        },
    }
}
