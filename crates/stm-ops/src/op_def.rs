// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Graph-facing operator definition and the named tensor workspace.

use std::collections::HashMap;

use stm_tensor::Tensor;

use crate::dispatcher::OperatorDispatcher;
use crate::error::{OpError, Result};

pub const SQR_DIFF_MEAN: &str = "SqrDiffMean";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorDef {
    op_type: String,
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl OperatorDef {
    pub fn builder(op_type: impl Into<String>, name: impl Into<String>) -> OperatorDefBuilder {
        OperatorDefBuilder {
            def: OperatorDef {
                op_type: op_type.into(),
                name: name.into(),
                inputs: Vec::new(),
                outputs: Vec::new(),
            },
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}

#[derive(Clone, Debug)]
pub struct OperatorDefBuilder {
    def: OperatorDef,
}

impl OperatorDefBuilder {
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.def.inputs.push(name.into());
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.def.outputs.push(name.into());
        self
    }

    pub fn finalize(self) -> OperatorDef {
        self.def
    }
}

/// Named tensors shared by the operators of one net.
#[derive(Debug, Default)]
pub struct Workspace {
    tensors: HashMap<String, Tensor>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.tensors.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// SqrDiffMean bound to its definition: inputs `[primary, bias]`, one output.
pub struct SqrDiffMeanOp {
    def: OperatorDef,
    dispatcher: OperatorDispatcher,
}

impl SqrDiffMeanOp {
    pub fn new(def: OperatorDef, dispatcher: OperatorDispatcher) -> Result<Self> {
        if def.op_type() != SQR_DIFF_MEAN {
            return Err(OpError::InvalidDefinition(format!(
                "expected op type {SQR_DIFF_MEAN}, got {}",
                def.op_type()
            )));
        }
        if def.inputs().len() != 2 || def.outputs().len() != 1 {
            return Err(OpError::InvalidDefinition(format!(
                "{} '{}' takes 2 inputs and 1 output, got {} and {}",
                SQR_DIFF_MEAN,
                def.name(),
                def.inputs().len(),
                def.outputs().len()
            )));
        }
        Ok(Self { def, dispatcher })
    }

    pub fn def(&self) -> &OperatorDef {
        &self.def
    }

    pub fn dispatcher(&self) -> &OperatorDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut OperatorDispatcher {
        &mut self.dispatcher
    }

    /// Read both inputs from `ws`, run, and store the output under its name.
    pub fn run(&mut self, ws: &mut Workspace) -> Result<()> {
        let lookup = |name: &String| {
            ws.get(name)
                .ok_or_else(|| OpError::MissingInput(name.clone()))
        };
        let input = lookup(&self.def.inputs[0])?;
        let bias = lookup(&self.def.inputs[1])?;
        let output = self.dispatcher.run(input, bias)?;
        ws.insert(self.def.outputs[0].clone(), output);
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.dispatcher.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DeviceBinding;
    use stm_tensor::DataFormat;

    fn def() -> OperatorDef {
        OperatorDef::builder(SQR_DIFF_MEAN, "sqrdiff")
            .input("Input")
            .input("Input1")
            .output("Output")
            .finalize()
    }

    fn cpu() -> OperatorDispatcher {
        let mut dispatcher = OperatorDispatcher::new();
        dispatcher.bind(DeviceBinding::Cpu).unwrap();
        dispatcher
    }

    #[test]
    fn builder_keeps_order() {
        let def = def();
        assert_eq!(def.inputs(), &["Input".to_string(), "Input1".to_string()]);
        assert_eq!(def.outputs(), &["Output".to_string()]);
        assert_eq!(def.name(), "sqrdiff");
    }

    #[test]
    fn wrong_type_or_arity_is_rejected() {
        let other = OperatorDef::builder("Softmax", "s")
            .input("a")
            .input("b")
            .output("c")
            .finalize();
        assert!(matches!(
            SqrDiffMeanOp::new(other, cpu()),
            Err(OpError::InvalidDefinition(_))
        ));

        let one_input = OperatorDef::builder(SQR_DIFF_MEAN, "s")
            .input("a")
            .output("c")
            .finalize();
        assert!(matches!(
            SqrDiffMeanOp::new(one_input, cpu()),
            Err(OpError::InvalidDefinition(_))
        ));

        let two_outputs = OperatorDef::builder(SQR_DIFF_MEAN, "s")
            .input("a")
            .input("b")
            .output("c")
            .output("d")
            .finalize();
        assert!(matches!(
            SqrDiffMeanOp::new(two_outputs, cpu()),
            Err(OpError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn run_reads_and_writes_named_tensors() {
        let mut ws = Workspace::new();
        ws.insert(
            "Input",
            Tensor::from_f32(vec![1, 2, 2, 1], DataFormat::Nhwc, vec![1.0, 2.0, 3.0, 4.0])
                .unwrap(),
        );
        let mut op = SqrDiffMeanOp::new(def(), cpu()).unwrap();
        assert!(matches!(op.run(&mut ws), Err(OpError::MissingInput(name)) if name == "Input1"));
        assert!(!ws.contains("Output"));

        ws.insert(
            "Input1",
            Tensor::from_f32(vec![1, 1, 1, 1], DataFormat::Nhwc, vec![2.0]).unwrap(),
        );
        op.run(&mut ws).unwrap();
        op.sync().unwrap();
        assert_eq!(ws.get("Output").unwrap().as_f32().unwrap(), &[1.5]);
        assert_eq!(ws.len(), 3);
    }
}
