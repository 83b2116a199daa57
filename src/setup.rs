//! Parse input configuration file

use std::fmt;
use std::error::Error;
use std::path::Path;
use yaml_rust::{YamlLoader, yaml::Yaml};
use meval::Context;

pub enum InputError {
    InvalidInputFile(&'static str),
    CouldNotParse(String, String),
    MissingField(String, String),
}

impl fmt::Debug for InputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use InputError::*;
        let help_msg = "Usage: mpirun -n np ./garnet input-file";
        match self {
            InvalidInputFile(s) => write!(f, "invalid input file: {}\n{}", s, help_msg),
            CouldNotParse(token, field) => write!(f, "unable to parse '{}' = '{}' in configuration file", token, field),
            MissingField(section, field) => write!(f, "unable to find '{}' in section '{}' with correct type in configuration file", field, section),
        }
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for InputError {}

/// Represents the input configuration, can be queried
/// for desired parameters
pub struct Configuration<'a> {
    input: Yaml,
    ctx: Context<'a>,
}

impl<'a> Configuration<'a> {
    pub fn from_file(path: &Path) -> Result<Configuration, InputError> {
        let contents = std::fs::read_to_string(path).map_err(|_e| InputError::InvalidInputFile("unable to read file"))?;
        let input = YamlLoader::load_from_str(&contents).map_err(|_e| InputError::InvalidInputFile("yaml trouble"))?;
        let input = input.first().ok_or(InputError::InvalidInputFile("yaml trouble"))?;
        Ok(Configuration {
            input: input.clone(),
            ctx: Context::new(),
        })
    }

    /// Loads user-defined constants from the named section, so that
    /// later fields can refer to them in meval expressions.
    pub fn with_context(&mut self, section: &str) -> &mut Self {
        let tmp = self.ctx.clone(); // a constant cannot depend on other constants yet...

        if let Some(hash) = self.input[section].as_hash() {
            for (a, b) in hash {
                match (a, b) {
                    (Yaml::String(s), Yaml::Real(v)) => {
                        if let Ok(num) = v.parse::<f64>() {self.ctx.var(s, num);}
                    },
                    (Yaml::String(s), Yaml::Integer(v)) => {
                        self.ctx.var(s, *v as f64);
                    },
                    (Yaml::String(s), Yaml::String(v)) => {
                        if let Ok(expr) = v.parse::<meval::Expr>() {
                            if let Ok(num) = expr.eval_with_context(&tmp) {self.ctx.var(s, num);}
                        }
                    },
                    _ => ()
                }
            }
        }

        self
    }

    fn evaluate(&self, section: &str, field: &str, y: &Yaml) -> Result<f64, InputError> {
        match y {
            Yaml::Real(s) => s.parse::<f64>().map_err(|_| InputError::CouldNotParse(field.to_owned(), s.clone())),
            Yaml::Integer(i) => Ok(*i as f64),
            Yaml::String(s) => {
                let expr = s.parse::<meval::Expr>().map_err(|_| InputError::CouldNotParse(field.to_owned(), s.clone()))?;
                expr.eval_with_context(&self.ctx).map_err(|_| InputError::CouldNotParse(field.to_owned(), s.clone()))
            },
            _ => Err(InputError::MissingField(section.to_owned(), field.to_owned())),
        }
    }

    pub fn real(&self, section: &str, field: &str) -> Result<f64, InputError> {
        self.evaluate(section, field, &self.input[section][field])
    }

    pub fn real3(&self, section: &str, field: &str) -> Result<[f64; 3], InputError> {
        match &self.input[section][field] {
            Yaml::Array(array) if array.len() == 3 => {
                let mut out = [0.0; 3];
                for (i, y) in array.iter().enumerate() {
                    out[i] = self.evaluate(section, field, y)?;
                }
                Ok(out)
            },
            _ => Err(InputError::MissingField(section.to_owned(), field.to_owned())),
        }
    }

    pub fn integer(&self, section: &str, field: &str) -> Result<i64, InputError> {
        match &self.input[section][field] {
            Yaml::Integer(i) => Ok(*i),
            _ => Err(InputError::MissingField(section.to_owned(), field.to_owned())),
        }
    }

    pub fn integer3(&self, section: &str, field: &str) -> Result<[i64; 3], InputError> {
        match &self.input[section][field] {
            Yaml::Array(array) if array.len() == 3 => {
                let mut out = [0i64; 3];
                for (i, y) in array.iter().enumerate() {
                    out[i] = match y {
                        Yaml::Integer(n) => *n,
                        _ => return Err(InputError::MissingField(section.to_owned(), field.to_owned())),
                    };
                }
                Ok(out)
            },
            _ => Err(InputError::MissingField(section.to_owned(), field.to_owned())),
        }
    }

    pub fn bool(&self, section: &str, field: &str) -> Result<bool, InputError> {
        match &self.input[section][field] {
            Yaml::Boolean(b) => Ok(*b),
            _ => Err(InputError::MissingField(section.to_owned(), field.to_owned())),
        }
    }

    pub fn strings(&self, section: &str, field: &str) -> Result<Vec<String>, InputError> {
        let name = field.to_owned();
        match &self.input[section][field] {
            Yaml::String(s) => {
                Ok(vec![s.clone()])
            },
            Yaml::Array(array) => {
                let take_yaml_string = |y: &Yaml| -> Option<String> {
                    match y {
                        Yaml::String(s) => Some(s.clone()),
                        _ => None
                    }
                };
                let got: Vec<String> = array.iter().filter_map(take_yaml_string).collect();
                if got.is_empty() {
                    Err(InputError::CouldNotParse(section.to_owned(), name))
                } else {
                    Ok(got)
                }
            },
            _ => Err(InputError::MissingField(section.to_owned(), name))
        }
    }

    pub fn string(&self, section: &str, field: &str) -> Result<String, InputError> {
        let strs = self.strings(section, field)?;
        Ok(strs[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("garnet-setup-test-{}.yml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_mesh_section() {
        let path = write_config(
"constants:
  l: 8.0
mesh:
  grid: [8, 8, 8]
  box_l: [l, l, 2*l]
  cao: 3
  skin: 0.5
  differentiation: ik
");
        let mut config = Configuration::from_file(&path).unwrap();
        config.with_context("constants");
        assert!(config.integer3("mesh", "grid").unwrap() == [8, 8, 8]);
        assert!(config.real3("mesh", "box_l").unwrap() == [8.0, 8.0, 16.0]);
        assert!(config.integer("mesh", "cao").unwrap() == 3);
        assert!(config.real("mesh", "skin").unwrap() == 0.5);
        assert!(config.string("mesh", "differentiation").unwrap() == "ik");
        assert!(config.real("mesh", "absent").is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
