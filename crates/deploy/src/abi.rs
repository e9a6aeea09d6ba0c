//! Argument coercion and calldata encoding against contract ABIs.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
    primitives::{Address, Bytes, hex},
};

use crate::{DeployError, artifacts::ContractArtifact, model::FunctionCall};

/// A function call whose arguments have been validated and encoded.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub function: Function,
    pub calldata: Bytes,
    /// Human-readable form used in logs, e.g. `migrate(100)`.
    pub display: String,
}

/// Creation code for a contract plus the encoded constructor arguments on their own.
#[derive(Debug, Clone)]
pub struct PreparedDeployment {
    pub creation_code: Bytes,
    pub constructor_args: Bytes,
}

/// Parse an address, enforcing the EIP-55 checksum when the input is mixed case.
pub fn parse_address(value: &str) -> Result<Address, String> {
    let value = value.trim();
    let Some(body) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) else {
        return Err(format!("`{value}` is not 0x-prefixed"));
    };

    if body.len() != 40 {
        return Err(format!(
            "`{value}` has {} hex characters, expected 40",
            body.len()
        ));
    }
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{value}` contains non-hex characters"));
    }

    let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        let normalized = format!("0x{body}");
        return Address::parse_checksummed(&normalized, None)
            .map_err(|_| format!("`{value}` fails EIP-55 checksum validation"));
    }

    body.parse::<Address>()
        .map_err(|e| format!("`{value}` is not a valid address: {e}"))
}

/// Coerce string arguments into ABI values, checking arity and types.
pub fn coerce_args(
    target: &str,
    params: &[Param],
    args: &[String],
) -> Result<Vec<DynSolValue>, DeployError> {
    if params.len() != args.len() {
        return Err(DeployError::invalid_arguments(
            target,
            format!(
                "expected {} argument(s), got {}",
                params.len(),
                args.len()
            ),
        ));
    }

    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| coerce_arg(target, index, param, arg))
        .collect()
}

fn coerce_arg(
    target: &str,
    index: usize,
    param: &Param,
    arg: &str,
) -> Result<DynSolValue, DeployError> {
    let label = if param.name.is_empty() {
        format!("#{index}")
    } else {
        format!("`{}`", param.name)
    };

    let ty: DynSolType = param.resolve().map_err(|e| {
        DeployError::invalid_arguments(
            target,
            format!("unsupported type `{}` for {label}: {e}", param.ty),
        )
    })?;

    if ty == DynSolType::Address {
        return parse_address(arg)
            .map(DynSolValue::Address)
            .map_err(|e| DeployError::invalid_arguments(target, format!("{label}: {e}")));
    }

    ty.coerce_str(arg).map_err(|e| {
        DeployError::invalid_arguments(
            target,
            format!("{label} of type `{}` cannot be `{arg}`: {e}", param.ty),
        )
    })
}

/// Build creation code: artifact bytecode followed by the encoded constructor arguments.
pub fn encode_deployment(
    artifact: &ContractArtifact,
    args: &[String],
) -> Result<PreparedDeployment, DeployError> {
    if artifact.bytecode.is_empty() {
        return Err(DeployError::Configuration(format!(
            "artifact `{}` has no creation bytecode (abstract contract or interface?)",
            artifact.identifier
        )));
    }

    let constructor = artifact.abi.constructor.as_ref();
    let params = constructor.map(|c| c.inputs.as_slice()).unwrap_or_default();
    let values = coerce_args(&artifact.identifier, params, args)?;

    let encoded = match constructor {
        Some(constructor) => constructor.abi_encode_input(&values).map_err(|e| {
            DeployError::invalid_arguments(&artifact.identifier, format!("encoding failed: {e}"))
        })?,
        None => Vec::new(),
    };

    let mut creation_code = artifact.bytecode.to_vec();
    creation_code.extend_from_slice(&encoded);

    Ok(PreparedDeployment {
        creation_code: creation_code.into(),
        constructor_args: encoded.into(),
    })
}

/// Encode a call to `call.function`, choosing the overload whose arity and types fit.
pub fn encode_call(
    target: &str,
    abi: &JsonAbi,
    call: &FunctionCall,
) -> Result<PreparedCall, DeployError> {
    let overloads = abi.function(&call.function).ok_or_else(|| {
        DeployError::invalid_arguments(target, format!("no function `{}` in ABI", call.function))
    })?;

    let mut last_error = None;
    for function in overloads
        .iter()
        .filter(|f| f.inputs.len() == call.args.len())
    {
        match coerce_args(target, &function.inputs, &call.args) {
            Ok(values) => {
                let calldata = function.abi_encode_input(&values).map_err(|e| {
                    DeployError::invalid_arguments(
                        target,
                        format!("encoding `{}` failed: {e}", call.function),
                    )
                })?;
                return Ok(PreparedCall {
                    function: function.clone(),
                    calldata: calldata.into(),
                    display: call.to_string(),
                });
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        let arities: Vec<String> = overloads.iter().map(|f| f.inputs.len().to_string()).collect();
        DeployError::invalid_arguments(
            target,
            format!(
                "`{}` takes {} argument(s), got {}",
                call.function,
                arities.join(" or "),
                call.args.len()
            ),
        )
    }))
}

/// Decode the return data of a read-only call into display strings.
pub fn decode_output(call: &PreparedCall, data: &[u8]) -> anyhow::Result<Vec<String>> {
    let values = call
        .function
        .abi_decode_output(data, true)
        .map_err(|e| anyhow::anyhow!("Failed to decode output of {}: {e}", call.display))?;
    Ok(values.iter().map(render_value).collect())
}

pub fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Address(a) => a.to_checksum(None),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            let items: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
        DynSolValue::Tuple(items) => {
            let items: Vec<String> = items.iter().map(render_value).collect();
            format!("({})", items.join(", "))
        }
        other => format!("{other:?}"),
    }
}
