use crate::error::{Error, Result};

/// One OSC 1.0 argument. Only the types the firmware understands are modelled.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

impl OscArg {
    fn tag(&self) -> u8 {
        match self {
            OscArg::Int(_) => b'i',
            OscArg::Float(_) => b'f',
            OscArg::Str(_) => b's',
        }
    }
}

/// OSC message: padded address, padded type-tag string, big-endian arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: &str) -> Self {
        OscMessage { address: address.to_string(), args: Vec::new() }
    }

    pub fn with_arg(mut self, arg: OscArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(32);
        write_padded_str(&mut buffer, &self.address);

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        for arg in &self.args {
            tags.push(arg.tag() as char);
        }
        write_padded_str(&mut buffer, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => buffer.extend_from_slice(&v.to_be_bytes()),
                OscArg::Float(v) => buffer.extend_from_slice(&v.to_be_bytes()),
                OscArg::Str(s) => write_padded_str(&mut buffer, s),
            }
        }
        buffer
    }

    pub fn decode(buffer: &[u8]) -> Result<Self> {
        let mut cursor = 0;
        let address = read_padded_str(buffer, &mut cursor)?;
        if !address.starts_with('/') {
            return Err(Error::MalformedPayload(format!("OSC address '{}' must start with '/'", address)));
        }

        // Messages without a type-tag string are legal and carry no arguments.
        if cursor >= buffer.len() {
            return Ok(OscMessage { address, args: Vec::new() });
        }

        let tags = read_padded_str(buffer, &mut cursor)?;
        let tags = tags
            .strip_prefix(',')
            .ok_or_else(|| Error::MalformedPayload("OSC type tags must start with ','".into()))?
            .to_string();

        let mut args = Vec::with_capacity(tags.len());
        for tag in tags.bytes() {
            let arg = match tag {
                b'i' => OscArg::Int(i32::from_be_bytes(read_word(buffer, &mut cursor)?)),
                b'f' => OscArg::Float(f32::from_be_bytes(read_word(buffer, &mut cursor)?)),
                b's' => OscArg::Str(read_padded_str(buffer, &mut cursor)?),
                other => {
                    return Err(Error::MalformedPayload(format!("unsupported OSC type tag '{}'", other as char)));
                }
            };
            args.push(arg);
        }

        Ok(OscMessage { address, args })
    }
}

fn write_padded_str(buffer: &mut Vec<u8>, s: &str) {
    buffer.extend_from_slice(s.as_bytes());
    // At least one NUL, then pad to a 4-byte boundary.
    buffer.push(0);
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

fn read_padded_str(buffer: &[u8], cursor: &mut usize) -> Result<String> {
    let rest = buffer
        .get(*cursor..)
        .ok_or_else(|| Error::MalformedPayload("OSC string past end of buffer".into()))?;
    let nul = rest
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::MalformedPayload("unterminated OSC string".into()))?;
    let s = std::str::from_utf8(&rest[..nul])
        .map_err(|_| Error::MalformedPayload("OSC string is not valid UTF-8".into()))?
        .to_string();
    let padded = (nul + 4) & !3;
    *cursor += padded.min(rest.len());
    Ok(s)
}

fn read_word(buffer: &[u8], cursor: &mut usize) -> Result<[u8; 4]> {
    let end = *cursor + 4;
    let bytes = buffer
        .get(*cursor..end)
        .ok_or_else(|| Error::MalformedPayload("truncated OSC argument".into()))?;
    *cursor = end;
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}
