use super::*;
use smithay::utils::Point;

/// Parse a grefsen config file
///
/// Lines that cannot be parsed are skipped and recorded in
/// [`Config::warnings`] so the caller can log them once logging is set up.
pub fn parse_config(content: &str) -> Config {
    let mut config = Config::default();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Err(e) = parse_line(&mut config, line) {
            config
                .warnings
                .push(format!("line {}: failed to parse '{}': {}", line_num + 1, line, e));
        }
    }

    config
}

fn parse_line(config: &mut Config, line: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let first_part = parts.first().ok_or("Empty command line")?;

    match *first_part {
        "set" => parse_set(config, &parts[1..])?,
        "respawn" => config.respawn = Some(parse_bool(config, &parts[1..])?),
        "windowed" => config.windowed = Some(parse_bool(config, &parts[1..])?),
        "log" => parse_log(config, &parts[1..])?,
        "screen" => parse_screen(config, &parts[1..])?,
        "output" => parse_output(config, &parts[1..])?,
        "windows" => parse_windows(config, &parts[1..])?,
        other => return Err(format!("Unknown command: {other}").into()),
    }

    Ok(())
}

fn parse_set(config: &mut Config, parts: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    if parts.len() < 2 {
        return Err("set requires variable name and value".into());
    }

    let var_name = *parts.first().ok_or("Missing variable name")?;
    let value = parts[1..].join(" ");

    // Remove leading $ from variable name if present
    let var_name = var_name.strip_prefix('$').unwrap_or(var_name);

    // Expand any variables in the value
    let expanded_value = config.expand_variables(&value);
    config
        .variables
        .insert(var_name.to_string(), expanded_value);

    Ok(())
}

/// yes/no, true/false, on/off, 1/0
fn parse_bool(config: &Config, parts: &[&str]) -> Result<bool, Box<dyn std::error::Error>> {
    let value = parts.first().ok_or("Missing boolean value")?;
    let value = config.expand_variables(value).to_lowercase();
    match value.as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(format!("Invalid boolean value: {value}").into()),
    }
}

fn parse_log(config: &mut Config, parts: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    if parts.is_empty() {
        return Err("log requires a file path".into());
    }

    let path = config.expand_variables(&parts.join(" "));
    config.log_file = Some(PathBuf::from(path));

    Ok(())
}

fn parse_screen(config: &mut Config, parts: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    if parts.is_empty() {
        return Err("screen requires at least one name".into());
    }

    for name in parts {
        let name = config.expand_variables(name);
        config.screens.push(name);
    }

    Ok(())
}

fn parse_windows(config: &mut Config, parts: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let count = parts.first().ok_or("windows requires a count")?;
    let count: u32 = count
        .parse()
        .map_err(|_| format!("Invalid window count: {count}"))?;
    config.windows = Some(count);

    Ok(())
}

fn parse_output(config: &mut Config, parts: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    // Format: output <name> [resolution <WxH>] [position <x,y>] [physical_size <WxHmm>]
    let output_name = parts.first().ok_or("output requires at least a name")?;
    let (width, height) = DEFAULT_OUTPUT_SIZE;
    let mut output_config = OutputConfig::new(
        config.expand_variables(output_name),
        Rectangle::new((0, 0).into(), (width, height).into()),
    );

    let mut i = 1; // Start at 1 since parts[0] is the output name
    while i < parts.len() {
        match parts[i] {
            "resolution" if i + 1 < parts.len() => {
                let (width, height) = parse_size(parts[i + 1])?;
                output_config.geometry.size = (width, height).into();
                i += 2;
            }
            "position" if i + 1 < parts.len() => {
                let (x_str, y_str) = parts[i + 1]
                    .split_once(',')
                    .ok_or_else(|| format!("Invalid position format: {}", parts[i + 1]))?;
                let x: i32 = x_str
                    .parse()
                    .map_err(|_| format!("Invalid x position: {x_str}"))?;
                let y: i32 = y_str
                    .parse()
                    .map_err(|_| format!("Invalid y position: {y_str}"))?;
                output_config.geometry.loc = Point::from((x, y));
                i += 2;
            }
            "physical_size" if i + 1 < parts.len() => {
                let size = parts[i + 1].strip_suffix("mm").unwrap_or(parts[i + 1]);
                let (width, height) = parse_size(size)?;
                output_config.physical_size_mm = (width, height).into();
                i += 2;
            }
            other => return Err(format!("Unknown output option: {other}").into()),
        }
    }

    config.outputs.push(output_config);

    Ok(())
}

/// `WIDTHxHEIGHT` with both sides positive
fn parse_size(text: &str) -> Result<(i32, i32), Box<dyn std::error::Error>> {
    let (width_str, height_str) = text
        .split_once('x')
        .ok_or_else(|| format!("Invalid size format: {text}"))?;
    let width: i32 = width_str
        .parse()
        .map_err(|_| format!("Invalid width: {width_str}"))?;
    let height: i32 = height_str
        .parse()
        .map_err(|_| format!("Invalid height: {height_str}"))?;
    if width <= 0 || height <= 0 {
        return Err(format!("Size must be positive: {text}").into());
    }
    Ok((width, height))
}

/// Parse `WIDTHxHEIGHT+X+Y`, the position part being optional
pub fn parse_geometry(text: &str) -> Option<Rectangle<i32, Logical>> {
    let (size_part, pos_part) = match text.split_once('+') {
        Some((size, pos)) => (size, Some(pos)),
        None => (text, None),
    };
    let (width, height) = parse_size(size_part).ok()?;
    let (x, y) = match pos_part {
        Some(pos) => {
            let (x_part, y_part) = pos.split_once('+')?;
            (x_part.parse::<i32>().ok()?, y_part.parse::<i32>().ok()?)
        }
        None => (0, 0),
    };
    Some(Rectangle::new((x, y).into(), (width, height).into()))
}

/// Parse a command line output, `NAME:WIDTHxHEIGHT+X+Y`
pub fn parse_output_spec(text: &str) -> Result<OutputConfig, ConfigError> {
    let (name, geometry) = text
        .split_once(':')
        .ok_or_else(|| ConfigError::OutputSpec(text.to_string()))?;
    if name.is_empty() {
        return Err(ConfigError::OutputSpec(text.to_string()));
    }
    let geometry = parse_geometry(geometry).ok_or_else(|| ConfigError::OutputSpec(text.to_string()))?;
    Ok(OutputConfig::new(name, geometry))
}
