//! Two-way parameter partitions for differential learning rates.
//!
//! Every splitter returns the pretrained backbone first and everything that
//! was freshly initialised second. The groups are disjoint and together
//! cover every tensor the model's [`ModuleVisitor`] walk reaches.

use burn::{
    module::{Module, ModuleVisitor, ParamId},
    tensor::{backend::Backend, Tensor},
};

use crate::{conv_lstm::ConvLstm, detr::Detr, simple::SimpleModel};

/// Named set of parameter ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamGroup {
    name: &'static str,
    ids: Vec<ParamId>,
}

impl ParamGroup {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ids(&self) -> &[ParamId] {
        &self.ids
    }

    pub fn contains(&self, id: &ParamId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Default)]
struct ParamIdCollector {
    ids: Vec<ParamId>,
}

impl ParamIdCollector {
    fn add<B: Backend, M: Module<B>>(mut self, module: &M) -> Self {
        module.visit(&mut self);
        self
    }

    fn into_group(self, name: &'static str) -> ParamGroup {
        ParamGroup {
            name,
            ids: self.ids,
        }
    }
}

impl<B: Backend> ModuleVisitor<B> for ParamIdCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        self.ids.push(id);
    }
}

/// Ids of every float tensor in `module`, in visiting order.
pub fn collect_param_ids<B: Backend, M: Module<B>>(module: &M) -> Vec<ParamId> {
    ParamIdCollector::default().add(module).ids
}

pub fn simple_splitter<B: Backend>(model: &SimpleModel<B>) -> [ParamGroup; 2] {
    [
        ParamIdCollector::default()
            .add(&model.encoder)
            .into_group("backbone"),
        ParamIdCollector::default()
            .add(&model.attention)
            .add(&model.head)
            .into_group("head"),
    ]
}

pub fn convlstm_splitter<B: Backend>(model: &ConvLstm<B>) -> [ParamGroup; 2] {
    [
        ParamIdCollector::default()
            .add(&model.encoder)
            .into_group("backbone"),
        ParamIdCollector::default()
            .add(&model.lstm)
            .add(&model.attention_layer)
            .add(&model.head)
            .add(&model.classifier)
            .into_group("head"),
    ]
}

pub fn detr_split<B: Backend>(model: &Detr<B>) -> [ParamGroup; 2] {
    [
        ParamIdCollector::default()
            .add(&model.backbone)
            .into_group("backbone"),
        ParamIdCollector::default()
            .add(&model.conv)
            .add(&model.transformer)
            .add(&model.query_pos)
            .add(&model.col_embed)
            .add(&model.row_embed)
            .add(&model.time_embed)
            .add(&model.lin)
            .into_group("head"),
    ]
}
