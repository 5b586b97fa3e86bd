use onegate_core::Error;

/// One op invocation: name plus optional `=argument`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub name: String,
    pub arg: Option<String>,
}

impl Op {
    fn parse(token: &str) -> Result<Self, Error> {
        let (name, arg) = match token.split_once('=') {
            Some((name, arg)) => (name.trim(), Some(arg.trim().to_string())),
            None => (token.trim(), None),
        };
        if name.is_empty() {
            return Err(Error::validation("empty op in mold chain"));
        }
        Ok(Op {
            name: name.to_string(),
            arg,
        })
    }
}

/// A parsed chain element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Op(Op),
    /// Apply the remainder of the chain to each container element.
    Dive,
    /// Apply the enclosed ops to map keys instead of values.
    Keys(Vec<Op>),
}

/// Parse an op chain: `op1=arg1,op2,dive,keys,op3,endkeys`.
///
/// A `keys` section must be closed by `endkeys` and may not nest or dive.
pub fn parse_chain(tag: &str) -> Result<Vec<Step>, Error> {
    let mut steps = Vec::new();
    let mut tokens = tag.split(',').map(str::trim).filter(|t| !t.is_empty());

    while let Some(token) = tokens.next() {
        match token {
            "dive" => steps.push(Step::Dive),
            "endkeys" => {
                return Err(Error::validation("'endkeys' without matching 'keys'"));
            }
            "keys" => {
                let mut ops = Vec::new();
                let mut closed = false;
                for token in tokens.by_ref() {
                    if token == "endkeys" {
                        closed = true;
                        break;
                    }
                    if token == "keys" || token == "dive" {
                        return Err(Error::validation(format!(
                            "'{token}' is not allowed inside a keys section"
                        )));
                    }
                    ops.push(Op::parse(token)?);
                }
                if !closed {
                    return Err(Error::validation("unterminated 'keys' section"));
                }
                steps.push(Step::Keys(ops));
            }
            op => steps.push(Step::Op(Op::parse(op)?)),
        }
    }

    Ok(steps)
}
