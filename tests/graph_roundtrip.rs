//! Integration tests for collecting, serializing and restoring layer graphs.

use makiflow::asg::Activation;
use makiflow::graph::{
    call, collect, restore, serialize, GraphError, LayerRecord, LayerRegistry, MakiTensor, TensorRecord,
};
use makiflow::models::Classificator;
use makiflow::nn::{
    ActivationLayer, ConcatLayer, ConvLayer, DenseLayer, DerivedLayer, DropoutLayer, FlattenLayer, InceptionC,
    InputLayer, MaxPoolLayer, SumLayer,
};
use makiflow::tensor::{ContextRef, GraphContext};
use std::collections::BTreeSet;
use std::rc::Rc;

/// conv -> inception -> (pool | pool) concat -> sum -> flatten -> dense.
fn conv_net(ctx: &ContextRef) -> (MakiTensor, MakiTensor) {
    let x = InputLayer::input(ctx, vec![4, 16, 16, 3], "input").unwrap();
    let c = call(Rc::new(ConvLayer::new(ctx, 3, 3, 3, 8, "conv1")), &[&x]).unwrap();
    let c = call(Rc::new(InceptionC::new(ctx, 8, [4, 6, 8], "block")), &[&c]).unwrap();
    let a = call(Rc::new(MaxPoolLayer::new("pool_a")), &[&c]).unwrap();
    let b = call(Rc::new(MaxPoolLayer::new("pool_b")), &[&c]).unwrap();
    let cat = call(Rc::new(ConcatLayer::new("concat", 3)), &[&a, &b]).unwrap();
    let s = call(Rc::new(SumLayer::new("sum")), &[&a, &b]).unwrap();
    let merged = call(Rc::new(ConcatLayer::new("concat2", 3)), &[&cat, &s]).unwrap();
    let act = call(Rc::new(ActivationLayer::new("tanh", Activation::Tanh)), &[&merged]).unwrap();
    let drop = call(Rc::new(DropoutLayer::new("drop", 0.8).unwrap()), &[&act]).unwrap();
    let flat = call(Rc::new(FlattenLayer::new("flatten")), &[&drop]).unwrap();
    let out = call(Rc::new(DenseLayer::new(ctx, 8 * 8 * 24, 10, "logits")), &[&flat]).unwrap();
    (x, out)
}

/// `(name, type, shape, parents)` of every tensor plus every parameter name.
fn topology(output: &MakiTensor) -> (Vec<(String, String, Vec<usize>, Vec<String>)>, BTreeSet<String>) {
    let graph = collect(&[output.clone()]).unwrap();
    let tensors = graph
        .tensors
        .values()
        .map(|t| {
            (
                t.name().to_string(),
                t.producer().layer_type().to_string(),
                t.shape().clone(),
                t.parent_tensor_names(),
            )
        })
        .collect();
    let params = graph.layers.values().flat_map(|l| l.parameters()).map(|p| p.name).collect();
    (tensors, params)
}

#[test]
fn restore_of_serialize_preserves_topology() {
    let ctx = GraphContext::new_ref();
    let (_, out) = conv_net(&ctx);
    let records = serialize(&collect(&[out.clone()]).unwrap()).unwrap();

    let restored_ctx = GraphContext::new_ref();
    let tensors = restore(&restored_ctx, &records, &LayerRegistry::default()).unwrap();
    let restored_out = &tensors["logits"];

    assert_eq!(topology(&out), topology(restored_out));
    assert_eq!(restored_out.shape(), &vec![4, 10]);
}

#[test]
fn records_are_in_dependency_order() {
    let ctx = GraphContext::new_ref();
    let (_, out) = conv_net(&ctx);
    let records = serialize(&collect(&[out]).unwrap()).unwrap();
    let mut seen = BTreeSet::new();
    for record in &records {
        for parent in &record.parent_tensor_names {
            assert!(seen.contains(parent), "'{}' listed before its parent '{}'", record.name, parent);
        }
        seen.insert(record.name.clone());
    }
    assert_eq!(records.first().map(|r| r.name.as_str()), Some("input"));
}

#[test]
fn collect_lists_every_ancestor_once() {
    let ctx = GraphContext::new_ref();
    let (_, out) = conv_net(&ctx);
    let graph = collect(&[out.clone()]).unwrap();

    let expected: BTreeSet<String> = out.graph_tensors().keys().cloned().collect();
    let collected: BTreeSet<String> = graph.tensors.keys().cloned().collect();
    assert_eq!(collected, expected);
    assert_eq!(graph.tensors.len(), out.previous_tensors().len() + 1);
}

#[test]
fn inception_parameters_are_prefixed_and_unique() {
    let ctx = GraphContext::new_ref();
    let (_, out) = conv_net(&ctx);
    let graph = collect(&[out]).unwrap();
    let block = graph.layers["block"].parameters();

    assert_eq!(block.len(), 10);
    assert!(block.iter().all(|p| p.name.starts_with("block/")));
    let unique: BTreeSet<&str> = block.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(unique.len(), block.len());
}

#[test]
fn duplicate_layer_names_are_rejected() {
    let ctx = GraphContext::new_ref();
    let x = InputLayer::input(&ctx, vec![2, 4], "input").unwrap();
    let a = call(Rc::new(DenseLayer::new(&ctx, 4, 4, "dense")), &[&x]).unwrap();
    let b = call(Rc::new(DenseLayer::new(&ctx, 4, 4, "dense")), &[&a]).unwrap();

    let err = collect(&[b]).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateName { name, .. } if name == "dense"));
}

#[test]
fn shared_layer_survives_a_round_trip() {
    let ctx = GraphContext::new_ref();
    let x = InputLayer::input(&ctx, vec![2, 4], "input").unwrap();
    let shared = Rc::new(DenseLayer::new(&ctx, 4, 4, "shared"));
    let h1 = call(shared.clone(), &[&x]).unwrap();
    let h2 = call(shared, &[&h1]).unwrap();
    assert_eq!(h1.name(), "shared");
    assert_eq!(h2.name(), "shared_1");

    let graph = collect(&[h2]).unwrap();
    assert_eq!(graph.layers.len(), 2);
    let records = serialize(&graph).unwrap();

    let restored_ctx = GraphContext::new_ref();
    let tensors = restore(&restored_ctx, &records, &LayerRegistry::default()).unwrap();
    let a = tensors["shared"].producer();
    let b = tensors["shared_1"].producer();
    assert!(Rc::ptr_eq(a, b));
    assert_eq!(restored_ctx.borrow().graph().variables.len(), 2);
}

#[test]
fn derived_layers_round_trip() {
    let ctx = GraphContext::new_ref();
    let x = InputLayer::input(&ctx, vec![3, 5], "input").unwrap();
    let row = call(Rc::new(DerivedLayer::index("row", 1)), &[&x]).unwrap();
    let shape = call(Rc::new(DerivedLayer::shape("shape")), &[&row]).unwrap();
    assert_eq!(row.shape(), &vec![5]);
    assert_eq!(shape.shape(), &vec![1]);

    let records = serialize(&collect(&[shape.clone()]).unwrap()).unwrap();
    let tensors = restore(&GraphContext::new_ref(), &records, &LayerRegistry::default()).unwrap();
    assert_eq!(topology(&shape), topology(&tensors["shape"]));
}

#[test]
fn out_of_order_records_fail_fast() {
    let input = TensorRecord {
        name: "input".to_string(),
        parent_tensor_names: vec![],
        parent_layer_info: LayerRecord {
            layer_type: "InputLayer".to_string(),
            params: serde_json::json!({"name": "input", "input_shape": [2, 4]}),
        },
    };
    let flat = TensorRecord {
        name: "flat".to_string(),
        parent_tensor_names: vec!["input".to_string()],
        parent_layer_info: LayerRecord {
            layer_type: "FlattenLayer".to_string(),
            params: serde_json::json!({"name": "flat"}),
        },
    };
    let registry = LayerRegistry::default();

    let err = restore(&GraphContext::new_ref(), &[flat.clone(), input.clone()], &registry).unwrap_err();
    assert!(matches!(err, GraphError::UnknownReference { record, name } if record == "flat" && name == "input"));

    let mut unknown = flat;
    unknown.parent_layer_info.layer_type = "LSTMLayer".to_string();
    let err = restore(&GraphContext::new_ref(), &[input, unknown], &registry).unwrap_err();
    assert!(matches!(err, GraphError::UnknownLayerType(t) if t == "LSTMLayer"));
}

#[test]
fn architecture_file_round_trip() {
    let ctx = GraphContext::new_ref();
    let (x, out) = conv_net(&ctx);
    let model = Classificator::new(x, out, "convnet").unwrap();

    let path = std::env::temp_dir().join(format!("makiflow_arch_{}.json", std::process::id()));
    model.save_architecture(&path).unwrap();
    let restored = Classificator::from_json(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let json: serde_json::Value = serde_json::from_str(&restored.to_json_string().unwrap()).unwrap();
    assert_eq!(json["MODEL_INFO"]["input_mt"], "input");
    assert_eq!(json["MODEL_INFO"]["output_mt"], "logits");
    assert_eq!(json["MODEL_INFO"]["name"], "convnet");
    assert_eq!(json["GRAPH_INFO"].as_array().map(|a| a.len()), Some(12));
    assert_eq!(topology(&restored.model().outputs()[0]), topology(&model.model().outputs()[0]));
}

#[test]
fn restore_rejects_different_layers_sharing_a_name() {
    let record = |name: &str, parents: &[&str], layer_type: &str, params: serde_json::Value| TensorRecord {
        name: name.to_string(),
        parent_tensor_names: parents.iter().map(|p| p.to_string()).collect(),
        parent_layer_info: LayerRecord { layer_type: layer_type.to_string(), params },
    };
    let ctx = GraphContext::new_ref();
    let x = InputLayer::input(&ctx, vec![2, 4], "input").unwrap();
    let dense = call(Rc::new(DenseLayer::new(&ctx, 4, 4, "d")), &[&x]).unwrap();
    let mut records = serialize(&collect(&[dense]).unwrap()).unwrap();
    records.push(record("b", &["d"], "FlattenLayer", serde_json::json!({"name": "d"})));

    let err = restore(&GraphContext::new_ref(), &records, &LayerRegistry::default()).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateName { kind: "layer", name } if name == "d"));
}

#[test]
fn parameter_names_must_be_unique() {
    let ctx = GraphContext::new_ref();
    let x = InputLayer::input(&ctx, vec![2, 8, 8, 8], "input").unwrap();
    let block = call(Rc::new(InceptionC::new(&ctx, 8, [4, 6, 8], "block")), &[&x]).unwrap();
    let clash = call(Rc::new(ConvLayer::new(&ctx, 1, 1, 8, 4, "block/conv_L_1")), &[&block]).unwrap();

    let err = collect(&[clash.clone()]).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateName { kind: "parameter", name } if name.starts_with("block/conv_L_1/")));
    assert!(Classificator::new(x, clash, "clash").is_err());
}
